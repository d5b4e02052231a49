mod text_synchronisation;
use text_synchronisation::*;

mod completion;
use completion::CompletionHandler;

mod definition;
use definition::DefinitionHandler;

mod hover;
use hover::HoverHandler;

use lsp_types::notification::Notification as LspNotification;
use lsp_types::request::Request as LspRequest;
use tracing::warn;

use crate::json_rpc::{ErrorCode, Notification, Request, Response};
use crate::model::StoreError;
use crate::session::State;

/// Trait for handling notifications
pub trait SyncNotificationHandler {
    type Notification: LspNotification;

    fn handle(state: &mut State, params: <Self::Notification as LspNotification>::Params);
}

/// Trait for handling read-only requests against a document snapshot
pub trait SyncRequestHandler {
    type Request: LspRequest;

    fn handle(
        state: &State,
        params: <Self::Request as LspRequest>::Params,
    ) -> Result<<Self::Request as LspRequest>::Result, StoreError>;
}

macro_rules! build_notification_dispatcher {
    ($name:ident, { $( $sync_handler:ty ),* }) => {
        pub fn $name(state: &mut State, notification: Notification) {
            match notification.method.as_str() {
                $(
                    <$sync_handler as SyncNotificationHandler>::Notification::METHOD => {
                        match serde_json::from_value(notification.params) {
                            Ok(params) => {
                                <$sync_handler as SyncNotificationHandler>::handle(state, params);
                            }
                            Err(err) => {
                                warn!("Could not parse {} params: {}", notification.method, err);
                            }
                        }
                    }
                )*,
                other => {
                    // Allow optional notifications
                    if !other.starts_with("$/") {
                        warn!("Unexpected notification method '{}'", notification.method);
                    }
                }
            }
        }
    };
}

macro_rules! build_request_dispatcher {
    ($name:ident, { $( $sync_handler:ty ),* }) => {
        pub fn $name(state: &State, request: Request) -> Response {
            match request.method.as_str() {
                $(
                    <$sync_handler as SyncRequestHandler>::Request::METHOD => {
                        let params = match serde_json::from_value(request.params) {
                            Ok(params) => params,
                            Err(err) => {
                                return Response::new_err(
                                    Some(request.id),
                                    ErrorCode::InvalidParams,
                                    format!("Could not parse {} params: {}", request.method, err),
                                );
                            }
                        };

                        match <$sync_handler as SyncRequestHandler>::handle(state, params) {
                            Ok(result) => Response::new_ok(request.id, result),
                            Err(err) => {
                                Response::new_err(Some(request.id), ErrorCode::RequestFailed, err.to_string())
                            }
                        }
                    }
                )*,
                _ => Response::new_err(Some(request.id), ErrorCode::MethodNotFound, "Method not found"),
            }
        }
    };
}

build_notification_dispatcher!(handle_non_lifecycle_notification, {
    DidOpenTextDocumentHandler,
    DidChangeTextDocumentHandler,
    DidCloseTextDocumentHandler
});

build_request_dispatcher!(handle_non_lifecycle_request, {
    CompletionHandler,
    HoverHandler,
    DefinitionHandler
});
