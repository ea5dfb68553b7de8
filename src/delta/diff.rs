//! Structural deltas between bucket snapshots
//!
//! `create_delta` and `apply_delta` are pure functions. For well-formed
//! snapshots (no truncation markers stored as data, and every source field
//! still present and non-empty in the destination) they satisfy
//! `apply_delta(src, &create_delta(src, dest)) == dest`.

use crate::core::types::{BucketData, BucketDelta, Cell, FieldDelta, Value};
use std::collections::BTreeSet;

/// Compute the delta that turns `src` into `dest`.
///
/// Fields that are missing or empty in `src` delta to the full `dest`
/// value. Fields that are missing or empty in `dest` delta to a key-level
/// [`FieldDelta::Remove`]. Unchanged fields are omitted.
pub fn create_delta(src: &BucketData, dest: &BucketData) -> BucketDelta {
    let keys: BTreeSet<&String> = src.keys().chain(dest.keys()).collect();
    let mut delta = BucketDelta::new();

    for key in keys {
        let src_data = src.get(key).filter(|values| !values.is_empty());
        let dest_data = dest.get(key);

        let field = match (src_data, dest_data) {
            (None, Some(dest_values)) => Some(FieldDelta::from_values(dest_values)),
            (None, None) => None,
            (Some(_), None) => Some(FieldDelta::Remove),
            (Some(_), Some(dest_values)) if dest_values.is_empty() => Some(FieldDelta::Remove),
            (Some(src_values), Some(dest_values)) => {
                diff_field(src_values, dest_values).map(FieldDelta::Cells)
            }
        };

        if let Some(field) = field {
            delta.insert(key.clone(), field);
        }
    }

    delta
}

/// Index-wise difference between two value sequences.
///
/// Returns `None` when the sequences are equal. Unchanged positions are
/// [`Cell::Unset`]; if `dest` is shorter, a [`Cell::Null`] is emitted at the
/// first missing index and the walk stops there.
pub fn diff_field(src: &[Value], dest: &[Value]) -> Option<Vec<Cell>> {
    let max_size = src.len().max(dest.len());
    let mut cells = Vec::with_capacity(max_size);
    let mut changed = false;

    for i in 0..max_size {
        match dest.get(i) {
            None => {
                changed = true;
                cells.push(Cell::Null);
                break;
            }
            Some(dest_datum) if src.get(i) == Some(dest_datum) => cells.push(Cell::Unset),
            Some(dest_datum) => {
                changed = true;
                cells.push(Cell::Set(dest_datum.clone()));
            }
        }
    }

    changed.then_some(cells)
}

/// Apply `delta` on top of `bucket`, producing the resulting snapshot.
///
/// A field absent from the delta keeps the bucket's value. A key-level
/// [`FieldDelta::Remove`] also keeps the bucket's value; only index-level
/// `null` truncates.
pub fn apply_delta(bucket: &BucketData, delta: &BucketDelta) -> BucketData {
    let keys: BTreeSet<&String> = bucket.keys().chain(delta.keys()).collect();
    let mut applied = BucketData::new();

    for key in keys {
        let existing = bucket.get(key);

        let value = match delta.get(key) {
            None | Some(FieldDelta::Remove) => existing.cloned(),
            Some(FieldDelta::Cells(cells)) => {
                Some(apply_field(existing.map(Vec::as_slice).unwrap_or(&[]), cells))
            }
        };

        if let Some(value) = value {
            applied.insert(key.clone(), value);
        }
    }

    applied
}

/// Merge index-level cells over an existing value sequence.
///
/// Positions with no information inherit the existing value. A hole past
/// the end of `bucket` is padded with JSON null only when a later cell
/// assigns a value.
pub fn apply_field(bucket: &[Value], cells: &[Cell]) -> Vec<Value> {
    let max_size = cells.len().max(bucket.len());
    let mut data = Vec::with_capacity(max_size);

    for i in 0..max_size {
        let datum = match cells.get(i) {
            Some(Cell::Null) => break,
            Some(Cell::Set(value)) => value.clone(),
            Some(Cell::Unset) | None => match bucket.get(i) {
                Some(existing) => existing.clone(),
                None if assigns_later(&cells[i + 1..]) => Value::Null,
                None => break,
            },
        };
        data.push(datum);
    }

    data
}

fn assigns_later(cells: &[Cell]) -> bool {
    cells
        .iter()
        .take_while(|cell| !matches!(cell, Cell::Null))
        .any(|cell| matches!(cell, Cell::Set(_)))
}
