//! In-memory [`DeltaDao`] backed by a concurrent map.
//!
//! Every advance of a published marker folds the entries it covers into
//! the stream's snapshot, so the log only ever holds entries that still
//! have to go out and the snapshots stay the base of the first of them.

use crate::core::types::{DeltaEntry, DeltaType, DocId, UnixTs};
use crate::core::{Error, Result};
use crate::delta::diff::apply_delta;
use crate::storage::{DeltaDao, Document};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct StoredDocument {
    document: Document,
    processed_ts: Option<UnixTs>,
    errored: bool,
}

impl StoredDocument {
    fn new(mut document: Document) -> Self {
        for delta_type in DeltaType::ALL {
            document
                .rdelta
                .stream_mut(delta_type)
                .sort_by_key(|entry| entry.timestamp);
        }

        let mut stored = Self {
            document,
            processed_ts: None,
            errored: false,
        };
        for delta_type in DeltaType::ALL {
            stored.consume_published(delta_type);
        }
        stored
    }

    fn is_pending(&self) -> bool {
        !self.errored
            && self
                .processed_ts
                .map_or(true, |ts| ts < self.document.last_update())
    }

    /// Move published entries of one stream out of the log and into its
    /// snapshot. The stream must be sorted by timestamp.
    fn consume_published(&mut self, delta_type: DeltaType) {
        let document = &mut self.document;
        let Some(published) = document.delta_published_ts.get(delta_type) else {
            return;
        };

        let stream = document.rdelta.stream_mut(delta_type);
        let keep_from = stream.partition_point(|entry| entry.timestamp <= published);
        let consumed: Vec<DeltaEntry> = stream.drain(..keep_from).collect();

        let snapshot = match delta_type {
            DeltaType::Data => &mut document.data,
            DeltaType::Ratedata => &mut document.ratedata,
        };
        for entry in &consumed {
            *snapshot = apply_delta(snapshot, &entry.data);
        }
    }
}

/// Document store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemDeltaDao {
    documents: DashMap<DocId, StoredDocument>,
}

impl MemDeltaDao {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `documents`
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let dao = Self::new();
        for document in documents {
            dao.insert(document);
        }
        dao
    }

    /// Load a store from a JSON file holding an array of documents
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let documents: Vec<Document> = serde_json::from_str(&contents)?;

        info!(path = %path.display(), count = documents.len(), "Loaded document fixtures");
        Ok(Self::from_documents(documents))
    }

    /// Insert or replace a document, clearing its processing flags.
    ///
    /// Streams are sorted by timestamp and entries already covered by the
    /// published markers are folded into the snapshots.
    pub fn insert(&self, document: Document) {
        self.documents
            .insert(document.id(), StoredDocument::new(document));
    }

    /// Append a pending entry, creating the document on first write
    pub fn append_delta(&self, doc_id: DocId, delta_type: DeltaType, entry: DeltaEntry) {
        let mut stored = self
            .documents
            .entry(doc_id)
            .or_insert_with(|| StoredDocument::new(Document::new(doc_id)));

        let meta = &mut stored.document.meta;
        meta.last_update = meta.last_update.max(entry.timestamp);

        let stream = stored.document.rdelta.stream_mut(delta_type);
        let at = stream.partition_point(|existing| existing.timestamp <= entry.timestamp);
        stream.insert(at, entry);
    }

    /// Copy of a stored document
    pub fn get(&self, doc_id: DocId) -> Option<Document> {
        self.documents.get(&doc_id).map(|stored| stored.document.clone())
    }

    /// Whether the document is currently flagged as errored
    pub fn is_errored(&self, doc_id: DocId) -> bool {
        self.documents
            .get(&doc_id)
            .map_or(false, |stored| stored.errored)
    }

    /// Clear the error flag so the document is picked up again
    pub fn clear_error_flag(&self, doc_id: DocId) -> Result<()> {
        self.with_document(doc_id, |stored| stored.errored = false)
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn with_document<T>(&self, doc_id: DocId, f: impl FnOnce(&mut StoredDocument) -> T) -> Result<T> {
        self.documents
            .get_mut(&doc_id)
            .map(|mut stored| f(&mut stored))
            .ok_or_else(|| Error::persistence(doc_id, "document not found"))
    }
}

#[async_trait]
impl DeltaDao for MemDeltaDao {
    async fn get_unprocessed_documents(&self) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .documents
            .iter()
            .filter(|stored| stored.is_pending())
            .map(|stored| stored.document.clone())
            .collect();

        documents.sort_by_key(Document::id);
        Ok(documents)
    }

    async fn mark_document_as_processed(&self, doc_id: DocId, ts: UnixTs) -> Result<()> {
        self.with_document(doc_id, |stored| stored.processed_ts = Some(ts))?;

        debug!(doc_id, ts, "Document marked as processed");
        Ok(())
    }

    async fn set_error_flag(&self, doc_id: DocId) -> Result<()> {
        self.with_document(doc_id, |stored| {
            stored.errored = true;
            stored.document.error_count += 1;
        })
    }

    async fn set_published_ts(&self, doc_id: DocId, delta_type: DeltaType, ts: UnixTs) -> Result<()> {
        self.with_document(doc_id, |stored| {
            stored.document.delta_published_ts.set(delta_type, ts);
            stored.consume_published(delta_type);
        })
    }

    async fn get_error_count(&self, doc_id: DocId) -> Result<u32> {
        self.with_document(doc_id, |stored| stored.document.error_count)
    }
}
