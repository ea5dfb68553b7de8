//! Avro encoding of published messages
//!
//! Messages are assembled in JSON form: records are objects, enums are
//! symbol strings and union values are tagged with their branch name.
//! [`encode`] converts that form against the schema, reporting every
//! offending path, and writes it with [`apache_avro`]'s datum encoder;
//! [`decode`] reads a datum back into the same form.

mod convert;

pub use apache_avro::Schema;
pub use convert::{from_avro, to_avro};

use crate::core::{Error, Result, ValidationContext, Value};
use bytes::Bytes;

/// Parse a schema definition
pub fn parse_schema(text: &str) -> Result<Schema> {
    Schema::parse_str(text).map_err(|e| Error::schema(e.to_string()))
}

/// Name of the top-level type of `schema`
pub fn schema_name(schema: &Schema) -> String {
    convert::branch_name(schema)
}

/// Validate a JSON-form value against `schema` and encode it as an Avro datum.
///
/// A value that does not conform fails with [`Error::Validation`] carrying
/// the schema's own error and every offending path. Encoder failures are
/// returned as [`Error::Encoding`].
pub fn encode(schema: &Schema, value: &Value) -> Result<Bytes> {
    let (datum, context) = to_avro(schema, value);
    let encoded = apache_avro::to_avro_datum(schema, datum);

    if !context.invalid_paths.is_empty() {
        let reason = match encoded {
            Err(e) => e.to_string(),
            Ok(_) => "Value does not match schema".to_string(),
        };
        return Err(validation_error(schema, &reason, context));
    }

    encoded
        .map(Bytes::from)
        .map_err(|e| Error::encoding(e.to_string()))
}

/// Decode one Avro datum written with `schema`
pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<Value> {
    let mut reader = bytes;
    let datum = apache_avro::from_avro_datum(schema, &mut reader, None)
        .map_err(|e| Error::encoding(e.to_string()))?;

    if !reader.is_empty() {
        return Err(Error::encoding(format!(
            "{} trailing bytes after datum",
            reader.len()
        )));
    }

    from_avro(schema, &datum)
}

/// Validation failure for a message of `schema`
pub fn validation_error(schema: &Schema, reason: &str, context: ValidationContext) -> Error {
    let message = format!(
        "Invalid {} message: {} ({} invalid value(s))",
        schema_name(schema),
        reason,
        context.invalid_paths.len()
    );
    Error::Validation { message, context }
}
