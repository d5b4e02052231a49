use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use lsp_types::{TextDocumentContentChangeEvent, Url};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::model::Document;

/// Maximum number of out-of-order changes parked per document
pub const MAX_PENDING_CHANGES: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("unknown document {0}")]
    UnknownDocument(Url),

    #[error("stale version {received} of {uri}, current version is {current}")]
    StaleVersion {
        uri: Url,
        current: i32,
        received: i32,
    },

    #[error("could not apply edit at {range:?} to {uri}")]
    InvalidEdit { uri: Url, range: lsp_types::Range },

    #[error("{uri} is {size} bytes which exceeds the limit of {limit} bytes")]
    DocumentTooLarge { uri: Url, size: usize, limit: usize },

    #[error("too many changes to {uri} are waiting for version {expected}")]
    ReorderBufferFull { uri: Url, expected: i32 },
}

/// Outcome of [`DocumentStore::submit`]
#[derive(Debug)]
pub enum Submitted {
    /// The change was applied along with any parked changes that followed it
    Applied(Arc<Document>),
    /// The change is waiting for an earlier version
    Parked { expected: i32 },
}

struct Slot {
    document: Arc<Document>,
    pending: BTreeMap<i32, Vec<TextDocumentContentChangeEvent>>,
}

/// Open documents keyed by URI
///
/// Changes to the same document are serialised by a per-document lock. The map itself is only
/// locked while inserting, looking up or removing a document.
pub struct DocumentStore {
    config: Arc<ServerConfig>,
    documents: DashMap<Url, Arc<Mutex<Slot>>>,
}

impl DocumentStore {
    pub fn new(config: Arc<ServerConfig>) -> DocumentStore {
        DocumentStore {
            config,
            documents: DashMap::new(),
        }
    }

    fn check_size(&self, uri: &Url, size: usize) -> Result<(), StoreError> {
        let limit = self.config.max_document_size;

        if size > limit {
            Err(StoreError::DocumentTooLarge {
                uri: uri.clone(),
                size,
                limit,
            })
        } else {
            Ok(())
        }
    }

    fn slot(&self, uri: &Url) -> Result<Arc<Mutex<Slot>>, StoreError> {
        self.documents
            .get(uri)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::UnknownDocument(uri.clone()))
    }

    fn apply(
        &self,
        slot: &mut Slot,
        version: i32,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<Arc<Document>, StoreError> {
        let uri = slot.document.uri();
        let text = slot.document.apply_changes(changes)?;
        self.check_size(uri, text.len())?;

        let document = Arc::new(Document::new(
            uri.clone(),
            version,
            text.into(),
            &self.config.syntax,
        ));

        slot.document = Arc::clone(&document);
        Ok(document)
    }

    /// Opens a document, replacing any document already open at the same URI
    pub fn open(&self, uri: Url, version: i32, text: String) -> Result<Arc<Document>, StoreError> {
        self.check_size(&uri, text.len())?;

        let document = Arc::new(Document::new(
            uri.clone(),
            version,
            text.into(),
            &self.config.syntax,
        ));

        let slot = Slot {
            document: Arc::clone(&document),
            pending: BTreeMap::new(),
        };

        if self
            .documents
            .insert(uri, Arc::new(Mutex::new(slot)))
            .is_some()
        {
            debug!("Reopened {}", document.uri());
        }

        Ok(document)
    }

    /// Applies a change that must be exactly one version ahead of the current document
    pub fn change(
        &self,
        uri: &Url,
        version: i32,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<Arc<Document>, StoreError> {
        let slot = self.slot(uri)?;
        let mut slot = slot.lock();

        let current = slot.document.version();
        if i64::from(version) != i64::from(current) + 1 {
            return Err(StoreError::StaleVersion {
                uri: uri.clone(),
                current,
                received: version,
            });
        }

        self.apply(&mut slot, version, changes)
    }

    /// Applies a change or parks it until the versions before it have arrived
    pub fn submit(
        &self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<Submitted, StoreError> {
        let slot = self.slot(uri)?;
        let mut slot = slot.lock();

        let current = slot.document.version();
        if version <= current {
            return Err(StoreError::StaleVersion {
                uri: uri.clone(),
                current,
                received: version,
            });
        }

        let expected = current + 1;
        if version > expected {
            if slot.pending.len() >= MAX_PENDING_CHANGES && !slot.pending.contains_key(&version) {
                return Err(StoreError::ReorderBufferFull {
                    uri: uri.clone(),
                    expected,
                });
            }

            debug!("Parking version {} of {} until {} arrives", version, uri, expected);
            slot.pending.insert(version, changes);
            return Ok(Submitted::Parked { expected });
        }

        let mut document = self.apply(&mut slot, version, &changes)?;

        // Apply the changes that were waiting on this one
        loop {
            let next_version = match document.version().checked_add(1) {
                Some(next_version) => next_version,
                None => break,
            };
            let changes = match slot.pending.remove(&next_version) {
                Some(changes) => changes,
                None => break,
            };

            match self.apply(&mut slot, next_version, &changes) {
                Ok(next_document) => document = next_document,
                Err(err) => {
                    warn!("Discarding parked change: {}", err);
                    break;
                }
            }
        }

        Ok(Submitted::Applied(document))
    }

    pub fn close(&self, uri: &Url) -> Result<(), StoreError> {
        self.documents
            .remove(uri)
            .map(|_| ())
            .ok_or_else(|| StoreError::UnknownDocument(uri.clone()))
    }

    /// Returns a snapshot of the current version of a document
    pub fn get(&self, uri: &Url) -> Result<Arc<Document>, StoreError> {
        let slot = self.slot(uri)?;
        let document = Arc::clone(&slot.lock().document);
        Ok(document)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use proptest::prelude::*;

    fn uri() -> Url {
        Url::parse("file:///site/index.tmpl").unwrap()
    }

    fn full(text: &str) -> Vec<TextDocumentContentChangeEvent> {
        vec![TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: text.to_owned(),
        }]
    }

    fn store() -> DocumentStore {
        DocumentStore::new(Arc::new(ServerConfig::default()))
    }

    #[test]
    fn open_get_close() {
        let store = store();
        assert_eq!(0, store.len());

        store.open(uri(), 1, "{{ .A }}".to_owned()).unwrap();
        assert_eq!(1, store.len());

        let document = store.get(&uri()).unwrap();
        assert_eq!(1, document.version());
        assert_eq!("{{ .A }}", document.text());

        store.close(&uri()).unwrap();
        assert_eq!(Err(StoreError::UnknownDocument(uri())), store.get(&uri()).map(|_| ()));
        assert_eq!(Err(StoreError::UnknownDocument(uri())), store.close(&uri()));
    }

    #[test]
    fn strict_versions() {
        let store = store();
        store.open(uri(), 1, "a".to_owned()).unwrap();

        // N -> N is stale
        assert_eq!(
            Err(StoreError::StaleVersion {
                uri: uri(),
                current: 1,
                received: 1
            }),
            store.change(&uri(), 1, &full("b")).map(|_| ())
        );
        // Skipping a version is rejected too
        assert!(store.change(&uri(), 3, &full("b")).is_err());

        // N -> N + 1 is accepted
        let document = store.change(&uri(), 2, &full("b")).unwrap();
        assert_eq!(2, document.version());
        assert_eq!("b", document.text());

        assert_eq!(
            Err(StoreError::UnknownDocument(Url::parse("file:///other.tmpl").unwrap())),
            store
                .change(&Url::parse("file:///other.tmpl").unwrap(), 2, &full("b"))
                .map(|_| ())
        );
    }

    #[test]
    fn snapshots_are_immutable() {
        let store = store();
        store.open(uri(), 1, "a".to_owned()).unwrap();

        let before = store.get(&uri()).unwrap();
        store.change(&uri(), 2, &full("b")).unwrap();

        assert_eq!("a", before.text());
        assert_eq!("b", store.get(&uri()).unwrap().text());
    }

    #[test]
    fn out_of_order_changes_converge() {
        let store = store();
        store.open(uri(), 1, "a".to_owned()).unwrap();

        assert!(matches!(
            store.submit(&uri(), 3, full("c")),
            Ok(Submitted::Parked { expected: 2 })
        ));
        assert_eq!(1, store.get(&uri()).unwrap().version());

        match store.submit(&uri(), 2, full("b")) {
            Ok(Submitted::Applied(document)) => {
                assert_eq!(3, document.version());
                assert_eq!("c", document.text());
            }
            other => panic!("Expected applied change, got {:?}", other),
        }

        assert!(matches!(
            store.submit(&uri(), 2, full("b")),
            Err(StoreError::StaleVersion { current: 3, .. })
        ));
    }

    #[test]
    fn invalid_edit_leaves_document_untouched() {
        let store = store();
        store.open(uri(), 1, "abc".to_owned()).unwrap();

        let edit = vec![TextDocumentContentChangeEvent {
            range: Some(lsp_types::Range {
                start: lsp_types::Position::new(5, 0),
                end: lsp_types::Position::new(5, 0),
            }),
            range_length: None,
            text: "x".to_owned(),
        }];

        assert!(matches!(
            store.change(&uri(), 2, &edit),
            Err(StoreError::InvalidEdit { .. })
        ));

        let document = store.get(&uri()).unwrap();
        assert_eq!(1, document.version());
        assert_eq!("abc", document.text());
    }

    #[test]
    fn size_limit() {
        let store = DocumentStore::new(Arc::new(ServerConfig {
            max_document_size: 4,
            ..ServerConfig::default()
        }));

        assert!(matches!(
            store.open(uri(), 1, "12345".to_owned()),
            Err(StoreError::DocumentTooLarge { size: 5, limit: 4, .. })
        ));

        store.open(uri(), 1, "1234".to_owned()).unwrap();
        assert!(matches!(
            store.change(&uri(), 2, &full("12345")),
            Err(StoreError::DocumentTooLarge { .. })
        ));
        assert_eq!("1234", store.get(&uri()).unwrap().text());
    }

    #[test]
    fn bounded_reorder_buffer() {
        let store = store();
        store.open(uri(), 1, "a".to_owned()).unwrap();

        for version in 0..MAX_PENDING_CHANGES as i32 {
            store.submit(&uri(), version + 3, full("x")).unwrap();
        }

        assert_eq!(
            Err(StoreError::ReorderBufferFull {
                uri: uri(),
                expected: 2
            }),
            store.submit(&uri(), 1000, full("x")).map(|_| ())
        );
    }

    proptest! {
        #[test]
        fn any_arrival_order_converges(order in Just((2..10).collect::<Vec<i32>>()).prop_shuffle()) {
            let store = store();
            store.open(uri(), 1, "v1".to_owned()).unwrap();

            for version in order {
                store.submit(&uri(), version, full(&format!("v{}", version))).unwrap();
            }

            let document = store.get(&uri()).unwrap();
            prop_assert_eq!(9, document.version());
            prop_assert_eq!("v9", document.text());
        }
    }
}
