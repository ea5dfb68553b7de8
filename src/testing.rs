//! Mock collaborators shared by unit tests

use crate::core::types::{BucketData, DeltaType, DocId, TypedDelta, UnixTs};
use crate::core::{Error, Result};
use crate::publish::amqp::{AmqpChannel, AmqpConnection, AmqpMessage, PublishOptions};
use crate::publish::writer::MessageWriter;
use crate::storage::{DeltaDao, Document, DocumentMeta, MemDeltaDao};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One call to [`RecordingWriter::write`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Written {
    pub doc_id: DocId,
    pub delta_type: DeltaType,
    pub ts: UnixTs,
    pub bucket: BucketData,
    pub ratedata: BucketData,
}

/// Writer that records its inputs instead of encoding them
#[derive(Default)]
pub(crate) struct RecordingWriter {
    writes: Mutex<Vec<Written>>,
    fail: bool,
}

impl RecordingWriter {
    pub fn failing() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn writes(&self) -> Vec<Written> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl MessageWriter for RecordingWriter {
    async fn write(
        &self,
        ts: UnixTs,
        meta: &DocumentMeta,
        delta: &TypedDelta,
        bucket: &BucketData,
        ratedata: &BucketData,
    ) -> Result<Bytes> {
        if self.fail {
            return Err(Error::encoding("mock encoding failure"));
        }

        self.writes.lock().push(Written {
            doc_id: meta.id,
            delta_type: delta.delta_type,
            ts,
            bucket: bucket.clone(),
            ratedata: ratedata.clone(),
        });
        Ok(Bytes::from(delta.uid(meta.id)))
    }
}

#[derive(Default)]
struct MockChannel {
    refuse: AtomicBool,
    messages: Mutex<Vec<AmqpMessage>>,
}

impl AmqpChannel for MockChannel {
    fn publish(&self, exchange: &str, routing_key: &str, content: &[u8], options: &PublishOptions) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.messages.lock().push(AmqpMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: Bytes::copy_from_slice(content),
            options: options.clone(),
        });
        true
    }
}

/// Connection whose channel records messages and can be told to refuse them
pub(crate) struct MockConnection {
    channel: Arc<MockChannel>,
    connected: AtomicBool,
}

impl MockConnection {
    pub fn connected() -> Self {
        Self {
            channel: Arc::new(MockChannel::default()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn disconnected() -> Self {
        let connection = Self::connected();
        connection.connected.store(false, Ordering::SeqCst);
        connection
    }

    pub fn set_accept(&self, accept: bool) {
        self.channel.refuse.store(!accept, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<AmqpMessage> {
        self.channel.messages.lock().clone()
    }
}

#[async_trait]
impl AmqpConnection for MockConnection {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn get_amqp_channel(&self) -> Option<Arc<dyn AmqpChannel>> {
        if self.connected.load(Ordering::SeqCst) {
            let channel: Arc<dyn AmqpChannel> = self.channel.clone();
            Some(channel)
        } else {
            None
        }
    }

    fn get_exchange_name(&self) -> &str {
        "quoteupdate"
    }
}

/// In-memory DAO whose state updates can be made to fail per document
pub(crate) struct FailingDao {
    inner: MemDeltaDao,
    fail_processed: Mutex<HashSet<DocId>>,
    fail_error_flag: Mutex<HashSet<DocId>>,
    fail_published_ts: Mutex<HashSet<DocId>>,
}

impl FailingDao {
    pub fn new(inner: MemDeltaDao) -> Self {
        Self {
            inner,
            fail_processed: Mutex::new(HashSet::new()),
            fail_error_flag: Mutex::new(HashSet::new()),
            fail_published_ts: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_mark_processed(&self, doc_id: DocId) {
        self.fail_processed.lock().insert(doc_id);
    }

    pub fn fail_set_error_flag(&self, doc_id: DocId) {
        self.fail_error_flag.lock().insert(doc_id);
    }

    pub fn fail_set_published_ts(&self, doc_id: DocId) {
        self.fail_published_ts.lock().insert(doc_id);
    }

    pub fn inner(&self) -> &MemDeltaDao {
        &self.inner
    }
}

#[async_trait]
impl DeltaDao for FailingDao {
    async fn get_unprocessed_documents(&self) -> Result<Vec<Document>> {
        self.inner.get_unprocessed_documents().await
    }

    async fn mark_document_as_processed(&self, doc_id: DocId, ts: UnixTs) -> Result<()> {
        let rejected = self.fail_processed.lock().contains(&doc_id);
        if rejected {
            return Err(Error::persistence(doc_id, "mark processed rejected"));
        }
        self.inner.mark_document_as_processed(doc_id, ts).await
    }

    async fn set_error_flag(&self, doc_id: DocId) -> Result<()> {
        let rejected = self.fail_error_flag.lock().contains(&doc_id);
        if rejected {
            return Err(Error::persistence(doc_id, "error flag rejected"));
        }
        self.inner.set_error_flag(doc_id).await
    }

    async fn set_published_ts(&self, doc_id: DocId, delta_type: DeltaType, ts: UnixTs) -> Result<()> {
        let rejected = self.fail_published_ts.lock().contains(&doc_id);
        if rejected {
            return Err(Error::persistence(doc_id, "published marker rejected"));
        }
        self.inner.set_published_ts(doc_id, delta_type, ts).await
    }

    async fn get_error_count(&self, doc_id: DocId) -> Result<u32> {
        self.inner.get_error_count(doc_id).await
    }
}
