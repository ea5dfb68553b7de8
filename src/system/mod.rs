//! System utilities and monitoring
//!
//! Metrics and the processing event bus.

pub mod events;
pub mod metrics;

pub use events::{EventBus, ProcessorEvent};
