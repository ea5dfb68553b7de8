//! Core type definitions for bucket documents and their deltas
//!
//! A bucket maps a field name to an ordered sequence of values. Writes and
//! deltas address individual indexes of those sequences, and every index
//! can be in one of three states: no information, truncated, or assigned.
//! [`Cell`] models that tri-state explicitly instead of relying on sparse
//! arrays.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar (or nested) value held at a bucket index
pub type Value = serde_json::Value;

/// Document identifier
pub type DocId = u64;

/// Unix timestamp in seconds
pub type UnixTs = i64;

/// Step identifier within a document's workflow
pub type StepId = u32;

/// Materialized bucket snapshot: field name to its full value sequence
pub type BucketData = BTreeMap<String, Vec<Value>>;

/// Sparse, index-addressed write against a bucket
pub type BucketUpdate = BTreeMap<String, Vec<Cell>>;

/// Structural delta between two bucket snapshots.
///
/// A field absent from the map is unchanged.
pub type BucketDelta = BTreeMap<String, FieldDelta>;

/// State of a single index within a write or a delta
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "Option<Value>")]
pub enum Cell {
    /// No information; inherit whatever value is already present
    #[default]
    Unset,
    /// Truncation marker; the sequence ends at this index
    Null,
    /// Assignment of a concrete value at this index
    Set(Value),
}

impl Cell {
    /// Create an assignment cell
    pub fn set(value: impl Into<Value>) -> Self {
        Cell::Set(value.into())
    }

    /// Whether this cell carries no information
    pub fn is_unset(&self) -> bool {
        matches!(self, Cell::Unset)
    }

    /// Assigned value, if any
    pub fn value(&self) -> Option<&Value> {
        match self {
            Cell::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Option<Value>> for Cell {
    fn from(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => Cell::Null,
            Some(v) => Cell::Set(v),
        }
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        Some(value).into()
    }
}

/// Delta for a single field
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Option<Vec<Cell>>")]
pub enum FieldDelta {
    /// Key-level `null`: the field no longer exists in the destination
    Remove,
    /// Index-level changes
    Cells(Vec<Cell>),
}

impl From<Option<Vec<Cell>>> for FieldDelta {
    fn from(value: Option<Vec<Cell>>) -> Self {
        match value {
            None => FieldDelta::Remove,
            Some(cells) => FieldDelta::Cells(cells),
        }
    }
}

impl FieldDelta {
    /// Field delta assigning every value of `values`
    pub fn from_values(values: &[Value]) -> Self {
        FieldDelta::Cells(cells_from_values(values))
    }
}

/// Convert a dense value sequence into assignment cells
pub fn cells_from_values(values: &[Value]) -> Vec<Cell> {
    values.iter().cloned().map(Cell::Set).collect()
}

/// Convert a materialized snapshot into a write that assigns every index
pub fn update_from_data(data: &BucketData) -> BucketUpdate {
    data.iter()
        .map(|(name, values)| (name.clone(), cells_from_values(values)))
        .collect()
}

/// Which of a document's two delta streams an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaType {
    /// Changes to the document's primary bucket
    Data,
    /// Changes to the document's rating bucket
    Ratedata,
}

impl DeltaType {
    /// Both streams, in merge tie-break order
    pub const ALL: [DeltaType; 2] = [DeltaType::Data, DeltaType::Ratedata];

    /// Wire and storage name of the stream
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaType::Data => "data",
            DeltaType::Ratedata => "ratedata",
        }
    }
}

impl fmt::Display for DeltaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped unit of change in a delta stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeltaEntry {
    /// When the change occurred (Unix seconds)
    pub timestamp: UnixTs,

    /// The change itself
    #[serde(default)]
    pub data: BucketDelta,

    /// Step that produced the change, if any
    #[serde(default)]
    pub step_id: Option<StepId>,

    /// Whether the change came from a concluding save
    #[serde(default)]
    pub concluding_save: bool,
}

impl DeltaEntry {
    /// Create an entry without step information
    pub fn new(timestamp: UnixTs, data: BucketDelta) -> Self {
        Self {
            timestamp,
            data,
            step_id: None,
            concluding_save: false,
        }
    }

    /// Attach the producing step
    pub fn with_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }
}

/// A delta entry tagged with the stream it was taken from
#[derive(Debug, Clone, PartialEq)]
pub struct TypedDelta {
    /// Source stream
    pub delta_type: DeltaType,
    /// The entry
    pub entry: DeltaEntry,
}

impl TypedDelta {
    /// Unique id of this delta within its document
    pub fn uid(&self, doc_id: DocId) -> String {
        format!("{}_{}_{}", doc_id, self.entry.timestamp, self.delta_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_from_json() {
        let cells: Vec<Cell> = serde_json::from_value(json!(["a", null, 3])).unwrap();
        assert_eq!(cells, vec![Cell::set("a"), Cell::Null, Cell::set(3)]);
    }

    #[test]
    fn test_field_delta_null_is_remove() {
        let delta: BucketDelta = serde_json::from_value(json!({"foo": null, "bar": ["x"]})).unwrap();
        assert_eq!(delta["foo"], FieldDelta::Remove);
        assert_eq!(delta["bar"], FieldDelta::Cells(vec![Cell::set("x")]));
    }

    #[test]
    fn test_delta_entry_defaults() {
        let entry: DeltaEntry = serde_json::from_value(json!({"timestamp": 5})).unwrap();
        assert_eq!(entry.timestamp, 5);
        assert!(entry.data.is_empty());
        assert_eq!(entry.step_id, None);
        assert!(!entry.concluding_save);
    }

    #[test]
    fn test_uid() {
        let typed = TypedDelta {
            delta_type: DeltaType::Ratedata,
            entry: DeltaEntry::new(123, BucketDelta::new()),
        };
        assert_eq!(typed.uid(7), "7_123_ratedata");
    }
}
