//! Delta Relay - ordered, exactly-once publishing of bucket document deltas
//!
//! Documents are keyed stores of named value sequences ("buckets"). Every
//! change to a document is recorded as a timestamped delta; the relay
//! replays those deltas per document in timestamp order and publishes each
//! one, schema encoded, to a message exchange.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod avro;
pub mod bucket;
pub mod delta;
pub mod publish;
pub mod storage;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used items for convenience
pub use crate::bucket::{Bucket, DataBucket, MergeOptions, StagingBucket};
pub use crate::core::{Config, Error, Result, Value};
pub use crate::delta::{apply_delta, create_delta, DeltaProcessor};
pub use crate::publish::{DeltaPublisher, V1MessageWriter};
pub use crate::storage::{DeltaDao, Document, MemDeltaDao};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging and metrics from configuration
pub fn init(config: &Config) -> Result<()> {
    core::logging::init(&config.logging);

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    if config.metrics.enable_prometheus {
        system::metrics::init_registry();
    }

    Ok(())
}
