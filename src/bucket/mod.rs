//! Keyed stores of named fields
//!
//! A bucket maps each field name to an ordered sequence of values. All
//! writes go through [`Bucket::set_values`], whose index semantics are
//! shared by every implementation:
//!
//! - [`Cell::Unset`] carries no information and is skipped
//! - [`Cell::Null`] with `merge_null` truncates the field at that index
//! - anything else is assigned at that index
//!
//! [`StagingBucket`] decorates another bucket and buffers writes until they
//! are committed or reverted.

use crate::core::types::{BucketData, BucketUpdate, Cell, Value};

/// Plain in-memory bucket
pub mod data_bucket;

/// Write-buffering overlay
pub mod staging;

pub use data_bucket::DataBucket;
pub use staging::{StagingBucket, StagingEvent};

/// How a write is merged into existing field values.
///
/// The default replaces whole fields and stores `null` cells as values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Merge index by index; otherwise the written sequence replaces the field
    pub merge_index: bool,
    /// Treat `null` cells as truncation markers instead of values
    pub merge_null: bool,
}

impl MergeOptions {
    /// Index-wise merge honoring truncation markers
    pub const MERGE: MergeOptions = MergeOptions {
        merge_index: true,
        merge_null: true,
    };

    /// Index-wise merge storing `null` cells as values
    pub const MERGE_KEEP_NULL: MergeOptions = MergeOptions {
        merge_index: true,
        merge_null: false,
    };

    /// Whole-field replacement
    pub const REPLACE: MergeOptions = MergeOptions {
        merge_index: false,
        merge_null: true,
    };
}

/// Capability shared by all buckets
pub trait Bucket {
    /// Write `data` into the bucket.
    ///
    /// Returns `false` and leaves the bucket untouched when the write would
    /// not change any field.
    fn set_values(&mut self, data: &BucketUpdate, options: MergeOptions) -> bool;

    /// Replace the given fields entirely.
    ///
    /// A truncation marker is appended to every field so that positions
    /// beyond the written data are cleared.
    fn overwrite_values(&mut self, data: &BucketUpdate) -> bool {
        let terminated: BucketUpdate = data
            .iter()
            .map(|(name, cells)| {
                let mut cells = cells.clone();
                cells.push(Cell::Null);
                (name.clone(), cells)
            })
            .collect();

        self.set_values(&terminated, MergeOptions::MERGE)
    }

    /// Current values of a field; empty when the field does not exist
    fn get_data_by_name(&self, name: &str) -> &[Value];

    /// Snapshot of every field
    fn get_data(&self) -> BucketData;

    /// Whether `index` of field `name` holds a value
    fn has_index(&self, name: &str, index: usize) -> bool {
        index < self.get_data_by_name(name).len()
    }
}

/// Merge `cells` into `target` following [`Bucket::set_values`] semantics.
///
/// Assignments past the end pad the gap with JSON null.
pub(crate) fn merge_field(target: &mut Vec<Value>, cells: &[Cell], options: MergeOptions) {
    if !options.merge_index {
        let mut replaced = Vec::with_capacity(cells.len());
        for (i, cell) in cells.iter().enumerate() {
            match cell {
                Cell::Null if options.merge_null => break,
                Cell::Null => replaced.push(Value::Null),
                Cell::Set(value) => replaced.push(value.clone()),
                Cell::Unset => replaced.push(target.get(i).cloned().unwrap_or(Value::Null)),
            }
        }
        *target = replaced;
        return;
    }

    for (i, cell) in cells.iter().enumerate() {
        let value = match cell {
            Cell::Unset => continue,
            Cell::Null if options.merge_null => {
                target.truncate(i);
                break;
            }
            Cell::Null => Value::Null,
            Cell::Set(value) => value.clone(),
        };

        if i >= target.len() {
            target.resize(i + 1, Value::Null);
        }
        target[i] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_field_skips_unset() {
        let mut target = vec![json!("a"), json!("b")];
        merge_field(&mut target, &[Cell::Unset, Cell::set("B")], MergeOptions::MERGE);
        assert_eq!(target, vec![json!("a"), json!("B")]);
    }

    #[test]
    fn test_merge_field_truncates_on_null() {
        let mut target = vec![json!("a"), json!("b"), json!("c")];
        merge_field(&mut target, &[Cell::set("A"), Cell::Null, Cell::set("z")], MergeOptions::MERGE);
        assert_eq!(target, vec![json!("A")]);
    }

    #[test]
    fn test_merge_field_keeps_null_without_merge_null() {
        let mut target = vec![json!("a"), json!("b")];
        merge_field(&mut target, &[Cell::Null], MergeOptions::MERGE_KEEP_NULL);
        assert_eq!(target, vec![Value::Null, json!("b")]);
    }

    #[test]
    fn test_merge_field_pads_gaps() {
        let mut target = vec![json!("a")];
        merge_field(&mut target, &[Cell::Unset, Cell::Unset, Cell::set("c")], MergeOptions::MERGE);
        assert_eq!(target, vec![json!("a"), Value::Null, json!("c")]);
    }

    #[test]
    fn test_merge_field_replace() {
        let mut target = vec![json!("a"), json!("b"), json!("c")];
        merge_field(&mut target, &[Cell::Unset, Cell::set("x")], MergeOptions::REPLACE);
        assert_eq!(target, vec![json!("a"), json!("x")]);
    }
}
