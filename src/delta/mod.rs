//! Delta computation and ordered delta publishing
//!
//! - [`diff`]: pure create/apply functions over bucket snapshots
//! - [`stream`]: selection and two-way merge of a document's pending entries
//! - [`processor`]: the per-pass replay and publish loop

pub mod diff;
pub mod processor;
pub mod stream;

pub use diff::{apply_delta, create_delta};
pub use processor::{DeltaProcessor, PassSummary};
pub use stream::{pending_deltas, pending_entries, MergedStreams};
