use tracing::{debug, warn};

use crate::handler::SyncNotificationHandler;
use crate::model::{StoreError, Submitted};
use crate::session::State;
use crate::watcher::DocumentWatcher;

pub struct DidOpenTextDocumentHandler;

impl SyncNotificationHandler for DidOpenTextDocumentHandler {
    type Notification = lsp_types::notification::DidOpenTextDocument;

    fn handle(state: &mut State, params: lsp_types::DidOpenTextDocumentParams) {
        let text_document = params.text_document;

        if !state.config.accepts(&text_document.uri) {
            debug!("Ignoring {}", text_document.uri);
            return;
        }

        match state.documents.open(
            text_document.uri,
            text_document.version,
            text_document.text,
        ) {
            Ok(document) => {
                debug!(
                    "Opened {} with {} syntax errors ({} documents open)",
                    document.uri(),
                    document.diagnostics().len(),
                    state.documents.len()
                );
                state.diagnostics_watcher.did_open(&document);
            }
            Err(err) => warn!("Could not open document: {}", err),
        }
    }
}

pub struct DidChangeTextDocumentHandler;

impl SyncNotificationHandler for DidChangeTextDocumentHandler {
    type Notification = lsp_types::notification::DidChangeTextDocument;

    fn handle(state: &mut State, params: lsp_types::DidChangeTextDocumentParams) {
        let lsp_types::DidChangeTextDocumentParams {
            text_document,
            content_changes,
        } = params;

        if !state.config.accepts(&text_document.uri) {
            return;
        }

        match state
            .documents
            .submit(&text_document.uri, text_document.version, content_changes)
        {
            Ok(Submitted::Applied(document)) => state.diagnostics_watcher.did_change(&document),
            Ok(Submitted::Parked { expected }) => {
                debug!(
                    "Version {} of {} is waiting for version {}",
                    text_document.version, text_document.uri, expected
                );
            }
            Err(err) => warn!("Could not change document: {}", err),
        }
    }
}

pub struct DidCloseTextDocumentHandler;

impl SyncNotificationHandler for DidCloseTextDocumentHandler {
    type Notification = lsp_types::notification::DidCloseTextDocument;

    fn handle(state: &mut State, params: lsp_types::DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;

        match state.documents.close(&uri) {
            Ok(()) => state.diagnostics_watcher.did_close(&uri),
            Err(StoreError::UnknownDocument(_)) if !state.config.accepts(&uri) => {}
            Err(err) => warn!("Could not close document: {}", err),
        }
    }
}
