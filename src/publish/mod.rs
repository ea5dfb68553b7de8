//! Delta message publishing
//!
//! [`DeltaPublisher`] obtains a channel from an [`AmqpConnection`], has a
//! [`MessageWriter`] build and encode the envelope, and publishes it.

pub mod amqp;
pub mod publisher;
pub mod writer;

pub use amqp::{AmqpChannel, AmqpConnection, AmqpMessage, LocalAmqpConnection, PublishOptions};
pub use publisher::DeltaPublisher;
pub use writer::{MessageWriter, V1MessageWriter};
