//! Publishing of a single replayed delta

use crate::core::types::{BucketData, TypedDelta};
use crate::core::{Error, PublishContext, Result};
use crate::publish::amqp::{AmqpConnection, PublishOptions};
use crate::publish::writer::MessageWriter;
use crate::storage::DocumentMeta;
use crate::system::metrics::{self, Timer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Encodes deltas and hands them to the exchange
#[derive(Clone)]
pub struct DeltaPublisher {
    connection: Arc<dyn AmqpConnection>,
    writer: Arc<dyn MessageWriter>,
}

impl DeltaPublisher {
    /// Create a publisher over a connection and a message writer
    pub fn new(connection: Arc<dyn AmqpConnection>, writer: Arc<dyn MessageWriter>) -> Self {
        Self { connection, writer }
    }

    /// Publish `delta` together with the snapshots it produced.
    ///
    /// Fails with a transport error when no channel is available. Writer
    /// errors are returned unchanged. A refused message fails with
    /// "Delta publish failed" and the delta's identifying context.
    pub async fn publish(
        &self,
        meta: &DocumentMeta,
        delta: &TypedDelta,
        bucket: &BucketData,
        ratedata: &BucketData,
    ) -> Result<()> {
        let channel = self
            .connection
            .get_amqp_channel()
            .ok_or_else(|| Error::transport("No channel"))?;

        let ts = delta.entry.timestamp;
        let timer = Timer::publish();

        let buf = match self.writer.write(ts, meta, delta, bucket, ratedata).await {
            Ok(buf) => buf,
            Err(e) => {
                metrics::record_failed();
                return Err(e);
            }
        };

        let delta_uid = delta.uid(meta.id);
        let options = PublishOptions::for_delta(delta_uid.as_str());
        let exchange = self.connection.get_exchange_name();

        let published = channel.publish(exchange, "", &buf, &options);
        timer.finish();

        if !published {
            metrics::record_failed();
            let context = PublishContext {
                doc_id: meta.id,
                quote_id: meta.id,
                delta_type: delta.delta_type,
                delta_ts: ts,
            };
            warn!(%context, "Delta publish refused by exchange");
            return Err(Error::Publish {
                message: "Delta publish failed".to_string(),
                context,
            });
        }

        metrics::record_published(buf.len());
        debug!(delta_uid = %delta_uid, exchange, bytes = buf.len(), "Delta published");
        Ok(())
    }
}
