//! Core system types and foundations
//!
//! This module contains the fundamental building blocks of the delta relay,
//! including type definitions, error handling, configuration and logging.

pub mod types;
pub mod error;
pub mod config;
pub mod logging;

// Re-export commonly used items
pub use types::{
    BucketData, BucketDelta, BucketUpdate, Cell, DeltaEntry, DeltaType, DocId, FieldDelta,
    StepId, TypedDelta, UnixTs, Value,
};
pub use error::{Error, PublishContext, Result, ValidationContext};
pub use config::Config;
