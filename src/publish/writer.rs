//! Conversion of a replayed delta into a schema-encoded message

use crate::avro::{self, Schema};
use crate::core::config::WriterConfig;
use crate::core::types::{BucketData, BucketDelta, Cell, DeltaType, FieldDelta, TypedDelta, UnixTs};
use crate::core::{Result, ValidationContext, Value};
use crate::storage::DocumentMeta;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Map};
use tracing::{debug, warn};

/// Built-in envelope schema, version 1
pub const V1_SCHEMA: &str = include_str!("schema/quote_delta_v1.avsc");

/// Encodes one delta together with the snapshots it produced
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Build, validate and encode the message for `delta`.
    ///
    /// `ts` is the delta timestamp in Unix seconds; `bucket` and `ratedata`
    /// are the snapshots after the delta was applied.
    async fn write(
        &self,
        ts: UnixTs,
        meta: &DocumentMeta,
        delta: &TypedDelta,
        bucket: &BucketData,
        ratedata: &BucketData,
    ) -> Result<Bytes>;
}

/// Avro writer for the version 1 envelope
#[derive(Debug, Clone)]
pub struct V1MessageWriter {
    schema: Schema,
    program_id: String,
    program_version: String,
}

impl V1MessageWriter {
    /// Create a writer using the built-in schema
    pub fn new(program_id: impl Into<String>, program_version: impl Into<String>) -> Result<Self> {
        Ok(Self::with_schema(
            avro::parse_schema(V1_SCHEMA)?,
            program_id,
            program_version,
        ))
    }

    /// Create a writer using an explicit schema
    pub fn with_schema(
        schema: Schema,
        program_id: impl Into<String>,
        program_version: impl Into<String>,
    ) -> Self {
        Self {
            schema,
            program_id: program_id.into(),
            program_version: program_version.into(),
        }
    }

    /// Create a writer from configuration
    pub fn from_config(config: &WriterConfig) -> Result<Self> {
        let schema = match &config.schema_path {
            Some(path) => avro::parse_schema(&std::fs::read_to_string(path)?)?,
            None => avro::parse_schema(V1_SCHEMA)?,
        };
        Ok(Self::with_schema(
            schema,
            config.program_id.clone(),
            config.program_version.clone(),
        ))
    }

    /// Schema messages are validated and encoded against
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Build the envelope in union-tagged JSON form.
    ///
    /// Fails with [`crate::Error::Validation`] when a timestamp cannot be
    /// expressed in milliseconds.
    pub fn envelope(
        &self,
        ts: UnixTs,
        meta: &DocumentMeta,
        delta: &TypedDelta,
        bucket: &BucketData,
        ratedata: &BucketData,
    ) -> Result<Value> {
        let event_id = match delta.delta_type {
            DeltaType::Data => "STEP_SAVE",
            DeltaType::Ratedata => "RATE",
        };

        let mut overflow = ValidationContext::default();
        let mut millis = |path: &str, ts: UnixTs| -> UnixTs {
            ts.checked_mul(1000).unwrap_or_else(|| {
                overflow.invalid_paths.push(path.to_string());
                overflow.invalid_data.push(Value::from(ts));
                0
            })
        };
        let event_ts = millis("event.ts", ts);
        let created = meta.created.map(|ts| millis("document.created.long", ts));
        let modified = millis("document.modified.long", meta.last_update);
        let expires = meta.expires.map(|ts| millis("document.expires.long", ts));

        if !overflow.invalid_paths.is_empty() {
            return Err(avro::validation_error(
                &self.schema,
                "Timestamp out of range for milliseconds",
                overflow,
            ));
        }

        Ok(json!({
            "event": {
                "id": event_id,
                "ts": event_ts,
                "actor": "SERVER",
                "step": tagged("long", delta.entry.step_id),
            },
            "document": {
                "id": meta.id,
                "quote_set_id": tagged("long", meta.quote_set_id),
                "created": tagged("long", created),
                "modified": tagged("long", Some(modified)),
                "expires": tagged("long", expires),
            },
            "session": {
                "entity_name": tagged("string", meta.entity_name.as_deref()),
                "entity_id": tagged("string", meta.entity_id.as_deref()),
            },
            "data": { "bucket": format_bucket(bucket) },
            "ratedata": { "bucket": format_bucket(ratedata) },
            "delta": { "bucket": format_delta(&delta.entry.data) },
            "program": {
                "id": self.program_id,
                "version": self.program_version,
            },
        }))
    }
}

#[async_trait]
impl MessageWriter for V1MessageWriter {
    async fn write(
        &self,
        ts: UnixTs,
        meta: &DocumentMeta,
        delta: &TypedDelta,
        bucket: &BucketData,
        ratedata: &BucketData,
    ) -> Result<Bytes> {
        let buf = self
            .envelope(ts, meta, delta, bucket, ratedata)
            .and_then(|envelope| avro::encode(&self.schema, &envelope))
            .map_err(|err| {
                if let Some(context) = err.validation_context() {
                    warn!(
                        doc_id = meta.id,
                        invalid_paths = ?context.invalid_paths,
                        error = %err,
                        "Message envelope failed schema validation"
                    );
                }
                err
            })?;
        debug!(doc_id = meta.id, delta_ts = ts, bytes = buf.len(), "Encoded delta message");
        Ok(buf)
    }
}

/// Wrap an optional value as a `["null", branch]` union
fn tagged<T: Into<Value>>(branch: &str, value: Option<T>) -> Value {
    match value {
        Some(value) => {
            let mut object = Map::new();
            object.insert(branch.to_string(), value.into());
            Value::Object(object)
        }
        None => Value::Null,
    }
}

/// Retag a raw value into its union branch form.
///
/// `null` stays bare; containers are retagged recursively.
pub fn format_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) => json!({ "boolean": value }),
        Value::Number(_) => json!({ "double": value }),
        Value::String(_) => json!({ "string": value }),
        Value::Array(items) => {
            json!({ "array": items.iter().map(format_value).collect::<Vec<_>>() })
        }
        Value::Object(entries) => {
            let entries: Map<String, Value> = entries
                .iter()
                .map(|(key, entry)| (key.clone(), format_value(entry)))
                .collect();
            json!({ "map": entries })
        }
    }
}

/// Bucket snapshot as a plain map of retagged field arrays
pub fn format_bucket(bucket: &BucketData) -> Value {
    let fields: Map<String, Value> = bucket
        .iter()
        .map(|(name, values)| {
            let values: Vec<Value> = values.iter().map(format_value).collect();
            (name.clone(), json!({ "array": values }))
        })
        .collect();
    Value::Object(fields)
}

/// Delta as a plain map of retagged field arrays.
///
/// Removed fields become bare `null`. Within a field both unchanged
/// positions and the truncation marker go out as `null`; trailing unchanged
/// positions are dropped.
pub fn format_delta(delta: &BucketDelta) -> Value {
    let fields: Map<String, Value> = delta
        .iter()
        .map(|(name, field)| {
            let value = match field {
                FieldDelta::Remove => Value::Null,
                FieldDelta::Cells(cells) => {
                    let len = cells
                        .iter()
                        .rposition(|cell| !cell.is_unset())
                        .map_or(0, |last| last + 1);
                    let values: Vec<Value> = cells[..len]
                        .iter()
                        .map(|cell| match cell {
                            Cell::Set(value) => format_value(value),
                            Cell::Unset | Cell::Null => Value::Null,
                        })
                        .collect();
                    json!({ "array": values })
                }
            };
            (name.clone(), value)
        })
        .collect();
    Value::Object(fields)
}
