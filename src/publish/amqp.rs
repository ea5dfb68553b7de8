//! Message broker boundary
//!
//! Connection and channel lifecycle belong to the broker client; the
//! publisher only needs a channel that accepts or refuses a message.
//! [`LocalAmqpConnection`] is an in-process exchange over a bounded queue.

use crate::core::config::AmqpConfig;
use crate::core::{Result, Value};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Content type of every published delta message
pub const CONTENT_TYPE: &str = "avro/binary";

/// Message properties sent alongside the body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    /// MIME type of the body
    pub content_type: String,
    /// Application headers
    pub headers: BTreeMap<String, Value>,
}

impl PublishOptions {
    /// Properties for a delta message identified by `delta_uid`
    pub fn for_delta(delta_uid: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("version".to_string(), Value::from(1));
        headers.insert(
            "created".to_string(),
            Value::from(chrono::Utc::now().timestamp_millis()),
        );
        headers.insert("delta_uid".to_string(), Value::from(delta_uid.into()));

        Self {
            content_type: CONTENT_TYPE.to_string(),
            headers,
        }
    }
}

/// A message as handed to the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpMessage {
    /// Target exchange
    pub exchange: String,
    /// Routing key
    pub routing_key: String,
    /// Encoded body
    pub body: Bytes,
    /// Message properties
    pub options: PublishOptions,
}

/// Channel able to publish messages
pub trait AmqpChannel: Send + Sync {
    /// Publish a message.
    ///
    /// Returns `false` when the broker refuses it (NACK or full buffer).
    fn publish(&self, exchange: &str, routing_key: &str, content: &[u8], options: &PublishOptions) -> bool;
}

/// Connection handing out publish channels
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    /// Establish the connection and its channel
    async fn connect(&self) -> Result<()>;

    /// Current channel, if connected
    fn get_amqp_channel(&self) -> Option<Arc<dyn AmqpChannel>>;

    /// Exchange delta messages are published to
    fn get_exchange_name(&self) -> &str;
}

struct LocalChannel {
    sender: flume::Sender<AmqpMessage>,
}

impl AmqpChannel for LocalChannel {
    fn publish(&self, exchange: &str, routing_key: &str, content: &[u8], options: &PublishOptions) -> bool {
        let message = AmqpMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: Bytes::copy_from_slice(content),
            options: options.clone(),
        };

        self.sender.try_send(message).is_ok()
    }
}

/// In-process exchange backed by a bounded queue.
///
/// Publishing fails once the queue is full or the consumer has been
/// dropped. No channel is available until [`AmqpConnection::connect`].
pub struct LocalAmqpConnection {
    exchange: String,
    sender: flume::Sender<AmqpMessage>,
    channel: RwLock<Option<Arc<dyn AmqpChannel>>>,
}

impl LocalAmqpConnection {
    /// Create the exchange and the consumer end of its queue
    pub fn new(exchange: impl Into<String>, capacity: usize) -> (Self, flume::Receiver<AmqpMessage>) {
        let (sender, receiver) = flume::bounded(capacity);
        let connection = Self {
            exchange: exchange.into(),
            sender,
            channel: RwLock::new(None),
        };
        (connection, receiver)
    }

    /// Create the exchange from configuration
    pub fn from_config(config: &AmqpConfig) -> (Self, flume::Receiver<AmqpMessage>) {
        Self::new(config.exchange.clone(), config.queue_capacity)
    }

    /// Drop the current channel
    pub fn disconnect(&self) {
        self.channel.write().take();
    }
}

#[async_trait]
impl AmqpConnection for LocalAmqpConnection {
    async fn connect(&self) -> Result<()> {
        let mut channel = self.channel.write();
        if channel.is_none() {
            *channel = Some(Arc::new(LocalChannel {
                sender: self.sender.clone(),
            }));
            info!(exchange = %self.exchange, "Local exchange connected");
        }
        Ok(())
    }

    fn get_amqp_channel(&self) -> Option<Arc<dyn AmqpChannel>> {
        self.channel.read().clone()
    }

    fn get_exchange_name(&self) -> &str {
        &self.exchange
    }
}
