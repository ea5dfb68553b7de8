//! Ordered replay and publishing of pending document deltas
//!
//! One call to [`DeltaProcessor::process`] is one pass over every
//! unprocessed document:
//!
//! - pending entries of both streams are trimmed and merged by timestamp
//! - each entry is applied to the running snapshots and published, strictly
//!   one after the other
//! - the published marker of the entry's stream is advanced
//! - once every entry went out the document is marked as processed
//!
//! A failing document is flagged and the pass moves on. If flagging it
//! fails too, the pass stops and returns that error.

use crate::core::types::{DeltaType, UnixTs};
use crate::core::{Error, Result};
use crate::delta::diff::apply_delta;
use crate::delta::stream::pending_deltas;
use crate::publish::DeltaPublisher;
use crate::storage::{DeltaDao, Document};
use crate::system::events::{EventBus, ProcessorEvent};
use crate::system::metrics;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Outcome counters of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Documents fetched for this pass
    pub documents: usize,
    /// Documents fully published and marked as processed
    pub processed: usize,
    /// Documents flagged as errored
    pub errored: usize,
    /// Deltas published
    pub published: usize,
}

/// Orchestrates replay and publishing of pending deltas
pub struct DeltaProcessor {
    dao: Arc<dyn DeltaDao>,
    publisher: DeltaPublisher,
    events: EventBus,
}

impl DeltaProcessor {
    /// Create a processor
    pub fn new(dao: Arc<dyn DeltaDao>, publisher: DeltaPublisher, events: EventBus) -> Self {
        Self {
            dao,
            publisher,
            events,
        }
    }

    /// Event bus processing events are emitted on
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run one pass over all unprocessed documents
    pub async fn process(&self) -> Result<PassSummary> {
        let documents = self.dao.get_unprocessed_documents().await?;
        let mut summary = PassSummary {
            documents: documents.len(),
            ..PassSummary::default()
        };

        for document in &documents {
            let doc_id = document.id();
            let mut published = 0;

            match self.process_document(document, &mut published).await {
                Ok(()) => summary.processed += 1,
                Err(err) => {
                    error!(
                        doc_id,
                        error = %err,
                        retryable = err.is_retryable(),
                        context = ?err.context_fields(),
                        "Document processing failed"
                    );
                    self.events.emit(ProcessorEvent::Error {
                        doc_id,
                        message: err.to_string(),
                    });

                    if let Err(flag_err) = self.dao.set_error_flag(doc_id).await {
                        error!(doc_id, error = %flag_err, "Failed to flag document, aborting pass");
                        return Err(flag_err);
                    }

                    metrics::record_document_errored();
                    summary.errored += 1;
                }
            }

            summary.published += published;
        }

        if summary.documents > 0 {
            info!(
                documents = summary.documents,
                processed = summary.processed,
                errored = summary.errored,
                published = summary.published,
                "Delta pass complete"
            );
        }

        Ok(summary)
    }

    #[instrument(skip(self, document, published), fields(doc_id = document.id()))]
    async fn process_document(&self, document: &Document, published: &mut usize) -> Result<()> {
        let doc_id = document.id();
        let deltas = pending_deltas(document);

        let mut bucket = document.data.clone();
        let mut ratedata = document.ratedata.clone();

        for delta in &deltas {
            let delta_uid = delta.uid(doc_id);
            let delta_ts = delta.entry.timestamp;

            self.events.emit(ProcessorEvent::DeltaProcessStart {
                doc_id,
                delta_uid: delta_uid.clone(),
                delta_type: delta.delta_type,
            });

            match delta.delta_type {
                DeltaType::Data => bucket = apply_delta(&bucket, &delta.entry.data),
                DeltaType::Ratedata => ratedata = apply_delta(&ratedata, &delta.entry.data),
            }

            self.publisher
                .publish(&document.meta, delta, &bucket, &ratedata)
                .await?;
            *published += 1;

            self.dao
                .set_published_ts(doc_id, delta.delta_type, delta_ts)
                .await?;

            debug!(delta_uid = %delta_uid, "Delta replayed");
            self.events.emit(ProcessorEvent::DeltaPublished {
                doc_id,
                delta_type: delta.delta_type,
                delta_ts,
            });
            self.events.emit(ProcessorEvent::DeltaProcessEnd { doc_id, delta_uid });
        }

        let ts: UnixTs = document.last_update();
        self.dao
            .mark_document_as_processed(doc_id, ts)
            .await
            .map_err(|e| {
                if matches!(e, Error::Persistence { .. }) {
                    e
                } else {
                    Error::persistence(doc_id, e.to_string())
                }
            })?;

        metrics::record_document_processed();
        self.events
            .emit(ProcessorEvent::DocumentProcessed { doc_id, ts });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BucketData, BucketDelta, DeltaEntry};
    use crate::publish::{AmqpConnection, LocalAmqpConnection};
    use crate::storage::MemDeltaDao;
    use crate::testing::{FailingDao, MockConnection, RecordingWriter};
    use serde_json::json;

    struct Harness {
        dao: Arc<FailingDao>,
        connection: Arc<MockConnection>,
        writer: Arc<RecordingWriter>,
        processor: DeltaProcessor,
    }

    fn harness(documents: Vec<Document>) -> Harness {
        let dao = Arc::new(FailingDao::new(MemDeltaDao::from_documents(documents)));
        let connection = Arc::new(MockConnection::connected());
        let writer = Arc::new(RecordingWriter::default());
        let publisher = DeltaPublisher::new(connection.clone(), writer.clone());
        let processor = DeltaProcessor::new(dao.clone(), publisher, EventBus::default());

        Harness {
            dao,
            connection,
            writer,
            processor,
        }
    }

    fn entry(ts: UnixTs, data: serde_json::Value) -> DeltaEntry {
        let data: BucketDelta = serde_json::from_value(data).unwrap();
        DeltaEntry::new(ts, data)
    }

    fn document(id: u64, data: Vec<DeltaEntry>, ratedata: Vec<DeltaEntry>) -> Document {
        let mut doc = Document::new(id);
        doc.meta.last_update = data
            .iter()
            .chain(ratedata.iter())
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(0);
        doc.rdelta.data = data;
        doc.rdelta.ratedata = ratedata;
        doc
    }

    #[tokio::test]
    async fn test_publishes_in_timestamp_order() {
        let doc = document(
            1,
            vec![
                entry(1, json!({"foo": [""]})),
                entry(3, json!({"foo": ["first"]})),
                entry(5, json!({"foo": ["second"]})),
            ],
            vec![],
        );
        let h = harness(vec![doc]);

        let summary = h.processor.process().await.unwrap();
        assert_eq!(summary.published, 3);
        assert_eq!(summary.processed, 1);

        let snapshots: Vec<_> = h
            .writer
            .writes()
            .iter()
            .map(|w| (w.ts, w.bucket["foo"].clone()))
            .collect();
        assert_eq!(
            snapshots,
            vec![
                (1, vec![json!("")]),
                (3, vec![json!("first")]),
                (5, vec![json!("second")]),
            ]
        );
        assert_eq!(h.connection.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_interleaves_streams() {
        let doc = document(
            1,
            vec![entry(1, json!({"foo": ["a"]}))],
            vec![entry(2, json!({"prem": [100]}))],
        );
        let h = harness(vec![doc]);

        h.processor.process().await.unwrap();

        let writes = h.writer.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!((writes[0].delta_type, writes[0].ts), (DeltaType::Data, 1));
        assert_eq!((writes[1].delta_type, writes[1].ts), (DeltaType::Ratedata, 2));
        assert_eq!(writes[1].bucket["foo"], vec![json!("a")]);
        assert_eq!(writes[1].ratedata["prem"], vec![json!(100)]);
    }

    #[tokio::test]
    async fn test_unsaved_step_withheld_for_data_only() {
        let mut doc = document(
            1,
            vec![entry(1, json!({"foo": ["a"]})).with_step(2)],
            vec![entry(2, json!({"prem": [1]})).with_step(2)],
        );
        doc.top_saved_step_id = Some(1);
        let h = harness(vec![doc]);

        h.processor.process().await.unwrap();

        let writes = h.writer.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].delta_type, DeltaType::Ratedata);
        assert!(writes[0].bucket.is_empty());
    }

    #[tokio::test]
    async fn test_partial_dao_failure_is_isolated() {
        let h = harness(vec![
            document(1, vec![entry(1, json!({"foo": ["a"]}))], vec![]),
            document(2, vec![entry(1, json!({"foo": ["b"]}))], vec![]),
        ]);
        h.dao.fail_mark_processed(1);

        let summary = h.processor.process().await.unwrap();

        assert_eq!(summary.errored, 1);
        assert_eq!(summary.processed, 1);
        let published: Vec<u64> = h.writer.writes().iter().map(|w| w.doc_id).collect();
        assert_eq!(published, vec![1, 2]);
        assert_eq!(h.dao.get_error_count(1).await.unwrap(), 1);
        assert!(h.dao.inner().is_errored(1));
        assert!(!h.dao.inner().is_errored(2));
    }

    #[tokio::test]
    async fn test_double_dao_failure_aborts_pass() {
        let h = harness(vec![
            document(1, vec![entry(1, json!({"foo": ["a"]}))], vec![]),
            document(2, vec![entry(1, json!({"foo": ["b"]}))], vec![]),
        ]);
        h.dao.fail_mark_processed(1);
        h.dao.fail_set_error_flag(1);

        let err = h.processor.process().await.unwrap_err();

        assert!(err.to_string().contains("error flag rejected"));
        let published: Vec<u64> = h.writer.writes().iter().map(|w| w.doc_id).collect();
        assert_eq!(published, vec![1]);
    }

    #[tokio::test]
    async fn test_refused_publish_flags_document() {
        let h = harness(vec![document(1, vec![entry(1, json!({"foo": ["a"]}))], vec![])]);
        h.connection.set_accept(false);
        let mut events = h.processor.events().subscribe();

        let summary = h.processor.process().await.unwrap();

        assert_eq!(summary.errored, 1);
        assert!(h.dao.inner().is_errored(1));
        assert_eq!(
            h.dao.inner().get(1).unwrap().delta_published_ts.get(DeltaType::Data),
            None
        );

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let ProcessorEvent::Error { doc_id, message } = event {
                assert_eq!(doc_id, 1);
                assert_eq!(message, "Delta publish failed");
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_rejected_published_marker_flags_document() {
        let h = harness(vec![
            document(1, vec![entry(1, json!({"foo": ["a"]})), entry(2, json!({"foo": ["b"]}))], vec![]),
            document(2, vec![entry(1, json!({"foo": ["c"]}))], vec![]),
        ]);
        h.dao.fail_set_published_ts(1);

        let summary = h.processor.process().await.unwrap();

        assert_eq!(summary.errored, 1);
        assert_eq!(summary.processed, 1);
        assert!(h.dao.inner().is_errored(1));
        // the first entry went out but nothing after it did
        let published: Vec<(u64, UnixTs)> = h.writer.writes().iter().map(|w| (w.doc_id, w.ts)).collect();
        assert_eq!(published, vec![(1, 1), (2, 1)]);
        assert_eq!(
            h.dao.inner().get(1).unwrap().delta_published_ts.get(DeltaType::Data),
            None
        );
    }

    #[tokio::test]
    async fn test_resumes_partly_published_document() {
        let dao = Arc::new(MemDeltaDao::from_documents([document(
            1,
            vec![entry(1, json!({"foo": ["a"]})), entry(2, json!({"bar": ["b"]}))],
            vec![],
        )]));
        let (connection, consumer) = LocalAmqpConnection::new("quoteupdate", 1);
        connection.connect().await.unwrap();
        let writer = Arc::new(RecordingWriter::default());
        let publisher = DeltaPublisher::new(Arc::new(connection), writer.clone());
        let processor = DeltaProcessor::new(dao.clone(), publisher, EventBus::default());

        // queue holds one message, so the second publish is refused
        let summary = processor.process().await.unwrap();
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.published, 1);

        consumer.drain().for_each(drop);
        dao.clear_error_flag(1).unwrap();
        let summary = processor.process().await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.published, 1);

        let writes = writer.writes();
        let resumed = writes.last().unwrap();
        assert_eq!(resumed.ts, 2);
        let expected: BucketData = serde_json::from_value(json!({"foo": ["a"], "bar": ["b"]})).unwrap();
        assert_eq!(resumed.bucket, expected);
        assert_eq!(consumer.len(), 1);
        assert!(dao.get(1).unwrap().rdelta.is_empty());
    }

    #[tokio::test]
    async fn test_published_entries_not_republished() {
        let h = harness(vec![document(1, vec![entry(1, json!({"foo": ["a"]}))], vec![])]);

        h.processor.process().await.unwrap();
        h.dao
            .inner()
            .append_delta(1, DeltaType::Data, entry(4, json!({"foo": ["a", "z"]})));
        h.processor.process().await.unwrap();

        let writes = h.writer.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].ts, 4);
        // second pass starts from the snapshot the first pass published
        assert_eq!(writes[1].bucket["foo"], vec![json!("a"), json!("z")]);
    }

    #[tokio::test]
    async fn test_emits_lifecycle_events() {
        let h = harness(vec![document(1, vec![entry(7, json!({"foo": ["a"]}))], vec![])]);
        let mut events = h.processor.events().subscribe();

        h.processor.process().await.unwrap();

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                ProcessorEvent::DeltaProcessStart {
                    doc_id: 1,
                    delta_uid: "1_7_data".to_string(),
                    delta_type: DeltaType::Data,
                },
                ProcessorEvent::DeltaPublished {
                    doc_id: 1,
                    delta_type: DeltaType::Data,
                    delta_ts: 7,
                },
                ProcessorEvent::DeltaProcessEnd {
                    doc_id: 1,
                    delta_uid: "1_7_data".to_string(),
                },
                ProcessorEvent::DocumentProcessed { doc_id: 1, ts: 7 },
            ]
        );
    }
}
