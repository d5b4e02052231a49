use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use lsp_types::notification::Notification as _;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tracing::{debug, error};

use go_template_syntax::analyze::analyze;
use go_template_syntax::config::FunctionSet;
use go_template_syntax::diagnostic::{Diagnostic, Severity};

use crate::config::ServerConfig;
use crate::json_rpc::{Notification, ServerMessage};
use crate::model::Document;
use crate::watcher::DocumentWatcher;

const DIAGNOSTIC_SOURCE: &str = "go-template-lsp";

fn to_lsp_diagnostic(document: &Document, diagnostic: &Diagnostic) -> lsp_types::Diagnostic {
    let severity = match diagnostic.severity {
        Severity::Error => lsp_types::DiagnosticSeverity::ERROR,
        Severity::Warning => lsp_types::DiagnosticSeverity::WARNING,
        Severity::Information => lsp_types::DiagnosticSeverity::INFORMATION,
    };

    lsp_types::Diagnostic {
        range: document.span_to_range(diagnostic.span),
        severity: Some(severity),
        code: Some(lsp_types::NumberOrString::String(diagnostic.code.to_owned())),
        source: Some(DIAGNOSTIC_SOURCE.to_owned()),
        message: diagnostic.message.clone(),
        ..Default::default()
    }
}

pub fn diagnostics_for_document(
    document: &Document,
    functions: &FunctionSet,
) -> Vec<lsp_types::Diagnostic> {
    analyze(document.template(), functions)
        .iter()
        .map(|diagnostic| to_lsp_diagnostic(document, diagnostic))
        .collect()
}

fn publish_notification(
    url: &lsp_types::Url,
    version: Option<i32>,
    diagnostics: Vec<lsp_types::Diagnostic>,
) -> ServerMessage {
    Notification::new(
        lsp_types::notification::PublishDiagnostics::METHOD,
        lsp_types::PublishDiagnosticsParams {
            uri: url.clone(),
            diagnostics,
            version,
        },
    )
    .into()
}

struct DocumentTask {
    /// Latest document or `None` once the document has closed
    send_change: watch::Sender<Option<Arc<Document>>>,
    join_handle: task::JoinHandle<()>,
}

impl DocumentTask {
    /// Spawns a task publishing diagnostics for `document`
    ///
    /// `previous` is the task of an earlier session of the same document. Its final publish is
    /// awaited before this task publishes anything.
    pub fn new(
        outgoing: mpsc::Sender<ServerMessage>,
        config: Arc<ServerConfig>,
        document: Arc<Document>,
        previous: Option<task::JoinHandle<()>>,
    ) -> DocumentTask {
        let url = document.uri().clone();
        let (send_change, mut receive_change) = watch::channel(Some(document));

        let join_handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(err) = previous.await {
                    error!("Diagnostics task panicked: {}", err);
                }
            }

            loop {
                let document = receive_change.borrow_and_update().clone();

                let message = match document {
                    Some(document) => {
                        let pass_config = Arc::clone(&config);
                        let pass_document = Arc::clone(&document);

                        let diagnostics = task::spawn_blocking(move || {
                            diagnostics_for_document(&pass_document, &pass_config.syntax.functions)
                        })
                        .await;

                        let diagnostics = match diagnostics {
                            Ok(diagnostics) => Some(diagnostics),
                            Err(err) => {
                                error!("Diagnostics pass for {} failed: {}", url, err);
                                None
                            }
                        };

                        // Discard the pass if a newer version arrived while it ran
                        let latest_version = receive_change
                            .borrow()
                            .as_ref()
                            .map(|latest| latest.version());

                        match diagnostics {
                            Some(diagnostics) if latest_version == Some(document.version()) => {
                                Some(publish_notification(
                                    &url,
                                    Some(document.version()),
                                    diagnostics,
                                ))
                            }
                            Some(_) => {
                                debug!(
                                    "Discarding diagnostics for version {} of {}",
                                    document.version(),
                                    url
                                );
                                None
                            }
                            None => None,
                        }
                    }
                    None => {
                        // Clear the diagnostics of the closed document
                        let _ = outgoing.send(publish_notification(&url, None, vec![])).await;
                        break;
                    }
                };

                if let Some(message) = message {
                    if outgoing.send(message).await.is_err() {
                        break;
                    }
                }

                if receive_change.changed().await.is_err() {
                    break;
                }
            }
        });

        DocumentTask {
            send_change,
            join_handle,
        }
    }

    fn did_change(&self, document: Arc<Document>) {
        if self.send_change.send(Some(document)).is_err() {
            error!("Diagnostics task exited before its document closed");
        }
    }

    /// Clears the published diagnostics and lets the task finish
    fn close(self) -> task::JoinHandle<()> {
        let _ = self.send_change.send(None);
        self.join_handle
    }

    async fn shutdown(self) {
        drop(self.send_change);

        if let Err(err) = self.join_handle.await {
            error!("Diagnostics task panicked: {}", err);
        }
    }
}

/// Publishes diagnostics for every open document off the request path
pub struct DiagnosticsWatcher {
    outgoing: mpsc::Sender<ServerMessage>,
    config: Arc<ServerConfig>,
    document_tasks: HashMap<lsp_types::Url, DocumentTask>,
    closed_tasks: HashMap<lsp_types::Url, task::JoinHandle<()>>,
}

impl DiagnosticsWatcher {
    pub fn new(outgoing: mpsc::Sender<ServerMessage>, config: Arc<ServerConfig>) -> DiagnosticsWatcher {
        DiagnosticsWatcher {
            outgoing,
            config,
            document_tasks: HashMap::new(),
            closed_tasks: HashMap::new(),
        }
    }

    /// Waits for every in-flight diagnostics pass to publish
    pub async fn shutdown(self) {
        let document_task_futures = self
            .document_tasks
            .into_iter()
            .map(|(_, task)| task.shutdown());

        join_all(document_task_futures).await;

        for result in join_all(self.closed_tasks.into_values()).await {
            if let Err(err) = result {
                error!("Diagnostics task panicked: {}", err);
            }
        }
    }
}

impl DocumentWatcher for DiagnosticsWatcher {
    fn did_open(&mut self, document: &Arc<Document>) {
        // A reopened document keeps its task so passes stay ordered
        if let Some(document_task) = self.document_tasks.get(document.uri()) {
            document_task.did_change(Arc::clone(document));
            return;
        }

        // The clearing publish of an earlier close must not land after our first pass
        let previous = self
            .closed_tasks
            .remove(document.uri())
            .filter(|handle| !handle.is_finished());

        self.document_tasks.insert(
            document.uri().clone(),
            DocumentTask::new(
                self.outgoing.clone(),
                Arc::clone(&self.config),
                Arc::clone(document),
                previous,
            ),
        );
    }

    fn did_change(&mut self, document: &Arc<Document>) {
        if let Some(document_task) = self.document_tasks.get(document.uri()) {
            document_task.did_change(Arc::clone(document));
        }
    }

    fn did_close(&mut self, url: &lsp_types::Url) {
        if let Some(document_task) = self.document_tasks.remove(url) {
            self.closed_tasks.retain(|_, handle| !handle.is_finished());
            self.closed_tasks.insert(url.clone(), document_task.close());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn document(version: i32, text: &str) -> Arc<Document> {
        Arc::new(Document::new(
            lsp_types::Url::parse("file:///test.tmpl").unwrap(),
            version,
            text.into(),
            &ServerConfig::default().syntax,
        ))
    }

    fn expect_publish(message: ServerMessage) -> lsp_types::PublishDiagnosticsParams {
        match message {
            ServerMessage::Notification(notification)
                if notification.method == lsp_types::notification::PublishDiagnostics::METHOD =>
            {
                serde_json::from_value(notification.params).unwrap()
            }
            other => panic!("Expected diagnostics, got {:?}", other),
        }
    }

    #[test]
    fn correct_document_diagnostics() {
        let doc = document(1, "{{ range $i, $e := .Items }}{{ $e.Name | html }}{{ end }}");
        let diags = diagnostics_for_document(&doc, &FunctionSet::builtins());

        assert_eq!(Vec::<lsp_types::Diagnostic>::new(), diags);
    }

    #[test]
    fn unterminated_if_diagnostics() {
        let doc = document(1, "a\n{{ if .X }}b");
        let diags = diagnostics_for_document(&doc, &FunctionSet::builtins());

        assert_eq!(
            vec![lsp_types::Diagnostic {
                range: lsp_types::Range {
                    start: lsp_types::Position::new(1, 0),
                    end: lsp_types::Position::new(1, 11),
                },
                severity: Some(lsp_types::DiagnosticSeverity::ERROR),
                code: Some(lsp_types::NumberOrString::String(
                    "unterminated-block".to_owned()
                )),
                message: "`if` is missing its matching end".into(),
                source: Some(DIAGNOSTIC_SOURCE.to_owned()),
                ..Default::default()
            }],
            diags
        );
    }

    #[test]
    fn unknown_function_severity() {
        let doc = document(1, "{{ frobnicate . }}");
        let diags = diagnostics_for_document(&doc, &FunctionSet::builtins());

        assert_eq!(1, diags.len());
        assert_eq!(Some(lsp_types::DiagnosticSeverity::WARNING), diags[0].severity);
        assert_eq!(
            lsp_types::Range {
                start: lsp_types::Position::new(0, 3),
                end: lsp_types::Position::new(0, 13),
            },
            diags[0].range
        );
    }

    #[tokio::test]
    async fn publishes_latest_version_last() {
        let (send_outgoing, mut recv_outgoing) = mpsc::channel(16);
        let mut watcher = DiagnosticsWatcher::new(send_outgoing, Arc::new(ServerConfig::default()));

        watcher.did_open(&document(1, "{{ if .A }}"));
        watcher.did_change(&document(2, "{{ .B }}"));
        watcher.did_change(&document(3, "{{ end }}"));

        let mut versions = vec![];
        loop {
            let params = expect_publish(recv_outgoing.recv().await.unwrap());
            let version = params.version.unwrap();
            versions.push(version);

            if version == 3 {
                assert_eq!(1, params.diagnostics.len());
                break;
            }
        }

        // Never published out of order
        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));

        watcher.did_close(&lsp_types::Url::parse("file:///test.tmpl").unwrap());
        let params = expect_publish(recv_outgoing.recv().await.unwrap());
        assert_eq!(None, params.version);
        assert!(params.diagnostics.is_empty());

        watcher.shutdown().await;
        assert!(recv_outgoing.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reopen_publishes_after_clearing() {
        let url = lsp_types::Url::parse("file:///test.tmpl").unwrap();

        for _ in 0..20 {
            let (send_outgoing, mut recv_outgoing) = mpsc::channel(64);
            let mut watcher =
                DiagnosticsWatcher::new(send_outgoing, Arc::new(ServerConfig::default()));

            watcher.did_open(&document(1, "{{ if .A }}"));
            watcher.did_close(&url);
            watcher.did_open(&document(1, "{{ range .B }}"));
            watcher.shutdown().await;

            let mut published = vec![];
            while let Ok(message) = recv_outgoing.try_recv() {
                published.push(expect_publish(message));
            }

            // The reopened document keeps its diagnostics
            let last = published.last().unwrap();
            assert_eq!(Some(1), last.version);
            assert_eq!(1, last.diagnostics.len());

            // Clearing happens exactly once, before the reopened pass
            let clear_index = published
                .iter()
                .position(|params| params.version.is_none())
                .unwrap();
            assert_eq!(clear_index, published.len() - 2);
        }
    }
}
