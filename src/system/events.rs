//! Processing events broadcast to interested observers
//!
//! Emission never blocks and never fails; events are dropped when nobody
//! subscribes or a subscriber lags behind.

use crate::core::types::{DeltaType, DocId, UnixTs};
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Side effects observable while a pass runs
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    /// Replay of a delta started
    DeltaProcessStart {
        /// Document being replayed
        doc_id: DocId,
        /// Unique delta id
        delta_uid: String,
        /// Stream the delta came from
        delta_type: DeltaType,
    },
    /// Replay of a delta finished
    DeltaProcessEnd {
        /// Document being replayed
        doc_id: DocId,
        /// Unique delta id
        delta_uid: String,
    },
    /// A delta was accepted by the exchange
    DeltaPublished {
        /// Document the delta belongs to
        doc_id: DocId,
        /// Stream the delta came from
        delta_type: DeltaType,
        /// Timestamp of the delta
        delta_ts: UnixTs,
    },
    /// Every pending delta of a document was published
    DocumentProcessed {
        /// Processed document
        doc_id: DocId,
        /// Timestamp the document was marked processed at
        ts: UnixTs,
    },
    /// Processing of a document failed
    Error {
        /// Failing document
        doc_id: DocId,
        /// Error description
        message: String,
    },
}

/// Broadcast channel for [`ProcessorEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProcessorEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event to current subscribers
    pub fn emit(&self, event: ProcessorEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
