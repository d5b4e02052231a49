use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    ServerNotInitialized = -32002,
    RequestFailed = -32803,
}

/// Message received from the client
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Request(Request),
    Notification(Notification),
}

impl From<Request> for ClientMessage {
    fn from(request: Request) -> ClientMessage {
        ClientMessage::Request(request)
    }
}

impl From<Notification> for ClientMessage {
    fn from(notification: Notification) -> ClientMessage {
        ClientMessage::Notification(notification)
    }
}

/// Message sent to the client
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Response(Response),
    Notification(Notification),
}

impl From<Response> for ServerMessage {
    fn from(response: Response) -> ServerMessage {
        ServerMessage::Response(response)
    }
}

impl From<Notification> for ServerMessage {
    fn from(notification: Notification) -> ServerMessage {
        ServerMessage::Notification(notification)
    }
}

impl ServerMessage {
    /// Serialises the message with its `jsonrpc` version marker
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;

        if let serde_json::Value::Object(ref mut fields) = value {
            fields.insert("jsonrpc".to_owned(), "2.0".into());
        }

        serde_json::to_vec(&value)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: impl Serialize) -> Notification {
        Notification {
            method: method.into(),
            params: serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn new_lsp<N>(params: N::Params) -> Notification
    where
        N: lsp_types::notification::Notification,
    {
        Notification::new(N::METHOD, params)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
enum IdRepr {
    I64(i64),
    String(String),
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RequestId(IdRepr);

impl From<i64> for RequestId {
    fn from(id: i64) -> RequestId {
        RequestId(IdRepr::I64(id))
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> RequestId {
        RequestId(IdRepr::String(id))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: impl Serialize) -> Request {
        Request {
            id,
            method: method.into(),
            params: serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn new_lsp<R>(id: RequestId, params: R::Params) -> Request
    where
        R: lsp_types::request::Request,
    {
        Request::new(id, R::METHOD, params)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn new_ok<R: Serialize>(id: RequestId, result: R) -> Response {
        match serde_json::to_value(result) {
            Ok(result) => Response {
                id: Some(id),
                result: Some(result),
                error: None,
            },
            Err(err) => Response::new_err(
                Some(id),
                ErrorCode::RequestFailed,
                format!("could not serialise result: {}", err),
            ),
        }
    }

    pub fn new_err(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Response {
        let error = ResponseError {
            code: code as i32,
            message: message.into(),
            data: None,
        };

        Response {
            id,
            result: None,
            error: Some(error),
        }
    }
}
