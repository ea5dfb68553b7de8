//! Document persistence boundary
//!
//! The processor never talks to a database directly. It reads pending
//! documents and writes processing markers through [`DeltaDao`], which owns
//! the only state shared between passes.

use crate::core::types::{BucketData, DeltaEntry, DeltaType, DocId, StepId, UnixTs};
use crate::core::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// In-memory DAO implementation
pub mod mem_dao;

pub use mem_dao::MemDeltaDao;

/// Descriptive document fields carried into every published message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DocumentMeta {
    /// Document identifier
    pub id: DocId,
    /// Quote set the document belongs to
    pub quote_set_id: Option<u64>,
    /// Owning entity type
    pub entity_name: Option<String>,
    /// Owning entity identifier
    pub entity_id: Option<String>,
    /// Creation time (Unix seconds)
    pub created: Option<UnixTs>,
    /// Time of the most recent write (Unix seconds)
    pub last_update: UnixTs,
    /// Expiry time (Unix seconds)
    pub expires: Option<UnixTs>,
}

/// Accumulated, not yet fully published delta log of a document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeltaLog {
    /// Entries against the primary bucket
    pub data: Vec<DeltaEntry>,
    /// Entries against the rating bucket
    pub ratedata: Vec<DeltaEntry>,
}

impl DeltaLog {
    /// Entries of one stream
    pub fn stream(&self, delta_type: DeltaType) -> &[DeltaEntry] {
        match delta_type {
            DeltaType::Data => &self.data,
            DeltaType::Ratedata => &self.ratedata,
        }
    }

    /// Mutable entries of one stream
    pub fn stream_mut(&mut self, delta_type: DeltaType) -> &mut Vec<DeltaEntry> {
        match delta_type {
            DeltaType::Data => &mut self.data,
            DeltaType::Ratedata => &mut self.ratedata,
        }
    }

    /// Whether both streams are empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.ratedata.is_empty()
    }
}

/// Timestamp of the last published entry per stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PublishedTs {
    /// Primary bucket stream
    pub data: Option<UnixTs>,
    /// Rating bucket stream
    pub ratedata: Option<UnixTs>,
}

impl PublishedTs {
    /// Published timestamp of one stream
    pub fn get(&self, delta_type: DeltaType) -> Option<UnixTs> {
        match delta_type {
            DeltaType::Data => self.data,
            DeltaType::Ratedata => self.ratedata,
        }
    }

    /// Record the published timestamp of one stream
    pub fn set(&mut self, delta_type: DeltaType, ts: UnixTs) {
        match delta_type {
            DeltaType::Data => self.data = Some(ts),
            DeltaType::Ratedata => self.ratedata = Some(ts),
        }
    }
}

/// A persisted document together with its pending delta log.
///
/// `data` and `ratedata` are the snapshots the first pending entry of each
/// stream applies on top of.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Document {
    /// Identity and descriptive fields
    #[serde(flatten)]
    pub meta: DocumentMeta,

    /// Primary bucket snapshot
    pub data: BucketData,

    /// Rating bucket snapshot
    pub ratedata: BucketData,

    /// Pending delta entries per stream
    pub rdelta: DeltaLog,

    /// Last published timestamp per stream
    pub delta_published_ts: PublishedTs,

    /// Highest step durably saved; data entries beyond it are withheld
    pub top_saved_step_id: Option<StepId>,

    /// Number of times processing failed for this document
    pub error_count: u32,
}

impl Document {
    /// Create an empty document
    pub fn new(id: DocId) -> Self {
        Self {
            meta: DocumentMeta {
                id,
                ..DocumentMeta::default()
            },
            ..Self::default()
        }
    }

    /// Document identifier
    pub fn id(&self) -> DocId {
        self.meta.id
    }

    /// Time of the most recent write
    pub fn last_update(&self) -> UnixTs {
        self.meta.last_update
    }

    /// Starting snapshot of a stream
    pub fn snapshot(&self, delta_type: DeltaType) -> &BucketData {
        match delta_type {
            DeltaType::Data => &self.data,
            DeltaType::Ratedata => &self.ratedata,
        }
    }
}

/// Persistence of pending delta entries and per-document processing state
#[async_trait]
pub trait DeltaDao: Send + Sync {
    /// All documents with pending changes that are not flagged as errored
    async fn get_unprocessed_documents(&self) -> Result<Vec<Document>>;

    /// Record that every change up to `ts` has been published
    async fn mark_document_as_processed(&self, doc_id: DocId, ts: UnixTs) -> Result<()>;

    /// Flag the document as errored and increment its error counter
    async fn set_error_flag(&self, doc_id: DocId) -> Result<()>;

    /// Advance the published marker of one stream.
    ///
    /// Entries up to `ts` leave the pending log and are applied to the
    /// stream's snapshot, so a document resumed after a later failure
    /// replays on top of everything already published.
    async fn set_published_ts(&self, doc_id: DocId, delta_type: DeltaType, ts: UnixTs) -> Result<()>;

    /// Current error counter of the document
    async fn get_error_count(&self, doc_id: DocId) -> Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_from_json() {
        let doc: Document = serde_json::from_value(json!({
            "id": 9,
            "quote_set_id": 3,
            "entity_name": "account",
            "last_update": 50,
            "data": {"foo": ["a"]},
            "rdelta": {
                "data": [{"timestamp": 10, "data": {"foo": ["a"]}, "step_id": 2}],
            },
            "delta_published_ts": {"ratedata": 4},
            "top_saved_step_id": 2,
        }))
        .unwrap();

        assert_eq!(doc.id(), 9);
        assert_eq!(doc.meta.quote_set_id, Some(3));
        assert_eq!(doc.last_update(), 50);
        assert_eq!(doc.rdelta.stream(DeltaType::Data).len(), 1);
        assert!(doc.rdelta.stream(DeltaType::Ratedata).is_empty());
        assert_eq!(doc.delta_published_ts.get(DeltaType::Ratedata), Some(4));
        assert_eq!(doc.delta_published_ts.get(DeltaType::Data), None);
        assert_eq!(doc.top_saved_step_id, Some(2));
        assert!(doc.snapshot(DeltaType::Ratedata).is_empty());
    }
}
