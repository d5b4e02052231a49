pub mod bytestream;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::json_rpc::{ClientMessage, ServerMessage};

pub struct Connection {
    /// Channel producing incoming JSON-RPC messages
    pub incoming: mpsc::Receiver<ClientMessage>,

    /// Channel accepting outgoing JSON-RPC messages
    pub outgoing: mpsc::Sender<ServerMessage>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header line {0:?}")]
    MalformedHeader(String),

    #[error("header had no Content-Length")]
    MissingContentLength,

    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),

    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("body is not a JSON-RPC request or notification")]
    InvalidMessage(Option<crate::json_rpc::RequestId>),
}
