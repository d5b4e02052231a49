use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capabilities::server_capabilities;
use crate::config::ServerConfig;
use crate::handler;
use crate::json_rpc::{ClientMessage, ErrorCode, RequestId, Response, ServerMessage};
use crate::model::DocumentStore;
use crate::transport::Connection;
use crate::watcher::DiagnosticsWatcher;

pub struct State {
    pub config: Arc<ServerConfig>,
    pub documents: DocumentStore,
    pub diagnostics_watcher: DiagnosticsWatcher,
}

impl State {
    fn new(outgoing: mpsc::Sender<ServerMessage>, config: ServerConfig) -> State {
        let config = Arc::new(config);

        State {
            documents: DocumentStore::new(Arc::clone(&config)),
            diagnostics_watcher: DiagnosticsWatcher::new(outgoing, Arc::clone(&config)),
            config,
        }
    }

    async fn shutdown(self) {
        self.diagnostics_watcher.shutdown().await;
    }
}

/// Protocol lifecycle of a session
pub enum Lifecycle {
    Uninitialized,
    Initialized(State),
    ShuttingDown,
    Exited { clean: bool },
}

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("Server not initialized")]
    NotInitialized,

    #[error("Server already initialized")]
    AlreadyInitialized,

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Connection unexpectedly closed")]
    ConnectionClosed,

    #[error("Exit received before shutdown")]
    ExitWithoutShutdown,
}

impl SessionError {
    /// Returns the error rejecting a request in the given lifecycle state
    fn rejecting(lifecycle: &Lifecycle) -> SessionError {
        match lifecycle {
            Lifecycle::Uninitialized => SessionError::NotInitialized,
            Lifecycle::Initialized(_) => SessionError::AlreadyInitialized,
            Lifecycle::ShuttingDown | Lifecycle::Exited { .. } => SessionError::ShuttingDown,
        }
    }

    fn error_code(&self) -> ErrorCode {
        match self {
            SessionError::NotInitialized => ErrorCode::ServerNotInitialized,
            _ => ErrorCode::InvalidRequest,
        }
    }

    fn into_response(self, id: RequestId) -> Response {
        Response::new_err(Some(id), self.error_code(), self.to_string())
    }
}

pub fn create_initialize_response() -> lsp_types::InitializeResult {
    lsp_types::InitializeResult {
        server_info: Some(lsp_types::ServerInfo {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: Some(env!("CARGO_PKG_VERSION").to_owned()),
        }),
        capabilities: server_capabilities(),
    }
}

/// Runs a session loop against the provided connection
///
/// On a clean exit (`shutdown` followed by `exit`) this will return `Ok`, otherwise it will return
/// `Err`.
pub async fn run(connection: Connection) -> Result<(), SessionError> {
    let Connection {
        mut incoming,
        outgoing,
    } = connection;

    /// Receives an incoming message or returns `Err` if the receive channel is closed
    ///
    /// This will cause us to exit uncleanly if our connection closes unexpectedly.
    macro_rules! recv_or_return_err {
        ($lifecycle:expr) => {
            match incoming.recv().await {
                Some(incoming_message) => incoming_message,
                None => {
                    if let Lifecycle::Initialized(state) = $lifecycle {
                        state.shutdown().await;
                    }
                    return Err(SessionError::ConnectionClosed);
                }
            }
        };
    }

    /// Sends the outgoing message or returns `Err` if the send channel is closed
    macro_rules! send_or_return_err {
        ($outgoing_message:expr) => {
            if outgoing.send($outgoing_message.into()).await.is_err() {
                return Err(SessionError::ConnectionClosed);
            }
        };
    }

    let mut lifecycle = Lifecycle::Uninitialized;

    loop {
        match recv_or_return_err!(lifecycle) {
            ClientMessage::Notification(notification) if notification.method == "exit" => {
                let clean = matches!(lifecycle, Lifecycle::ShuttingDown);

                // Tear down our state or we'll likely to panic if there are concurrent operations
                if let Lifecycle::Initialized(state) = lifecycle {
                    state.shutdown().await;
                }

                lifecycle = Lifecycle::Exited { clean };
            }
            ClientMessage::Notification(notification) => match lifecycle {
                Lifecycle::Initialized(ref mut state) => {
                    if notification.method != "initialized" {
                        handler::handle_non_lifecycle_notification(state, notification);
                    }
                }
                _ => debug!("Dropping {} notification", notification.method),
            },
            ClientMessage::Request(request) if request.method == "initialize" => {
                if !matches!(lifecycle, Lifecycle::Uninitialized) {
                    send_or_return_err!(SessionError::rejecting(&lifecycle).into_response(request.id));
                    continue;
                }

                let params: lsp_types::InitializeParams =
                    match serde_json::from_value(request.params) {
                        Ok(params) => params,
                        Err(err) => {
                            warn!("Invalid initialize params: {}", err);
                            send_or_return_err!(Response::new_err(
                                Some(request.id),
                                ErrorCode::InvalidParams,
                                format!("Could not parse initialize params: {}", err)
                            ));
                            continue;
                        }
                    };

                let config = ServerConfig::from_initialization_options(params.initialization_options);
                info!(
                    "Initialized for {}",
                    params
                        .client_info
                        .map(|client_info| client_info.name)
                        .unwrap_or_else(|| "unknown client".to_owned())
                );

                lifecycle = Lifecycle::Initialized(State::new(outgoing.clone(), config));
                send_or_return_err!(Response::new_ok(request.id, create_initialize_response()));
            }
            ClientMessage::Request(request) if request.method == "shutdown" => {
                match std::mem::replace(&mut lifecycle, Lifecycle::ShuttingDown) {
                    Lifecycle::Initialized(state) => {
                        // Outstanding diagnostics are published before the acknowledgement
                        state.shutdown().await;
                        send_or_return_err!(Response::new_ok(request.id, ()));
                    }
                    previous => {
                        let error = SessionError::rejecting(&previous);
                        lifecycle = previous;
                        send_or_return_err!(error.into_response(request.id));
                    }
                }
            }
            ClientMessage::Request(request) => {
                let response = match lifecycle {
                    Lifecycle::Initialized(ref state) => {
                        handler::handle_non_lifecycle_request(state, request)
                    }
                    ref other => SessionError::rejecting(other).into_response(request.id),
                };

                send_or_return_err!(response);
            }
        }

        if let Lifecycle::Exited { clean } = lifecycle {
            return if clean {
                info!("Exiting cleanly");
                Ok(())
            } else {
                Err(SessionError::ExitWithoutShutdown)
            };
        }
    }
}
