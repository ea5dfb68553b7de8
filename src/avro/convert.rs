//! Conversion between JSON-form values and [`apache_avro`] values
//!
//! Union values use the JSON encoding: bare `null`, or a single-entry
//! object keyed by the branch name (`{"string": "x"}`). Every offending
//! value is reported with its dotted path so one bad field does not hide
//! the others.

use crate::core::{Error, Result, ValidationContext, Value};
use apache_avro::schema::{Name, RecordSchema, SchemaKind, UnionSchema};
use apache_avro::types::Value as AvroValue;
use apache_avro::Schema;
use serde_json::{Map, Number};
use std::collections::HashMap;

/// Named types of a schema, keyed by full name
struct Names<'s>(HashMap<String, &'s Schema>);

impl<'s> Names<'s> {
    fn collect(schema: &'s Schema) -> Self {
        let mut names = HashMap::new();
        collect_names(schema, &mut names);
        Self(names)
    }

    /// Follow a named reference to its definition
    fn resolve(&self, schema: &'s Schema) -> Option<&'s Schema> {
        match schema {
            Schema::Ref { name } => self.0.get(&fullname(name)).copied(),
            other => Some(other),
        }
    }
}

fn collect_names<'s>(schema: &'s Schema, names: &mut HashMap<String, &'s Schema>) {
    match schema {
        Schema::Record(record) => {
            names.insert(fullname(&record.name), schema);
            for field in &record.fields {
                collect_names(&field.schema, names);
            }
        }
        Schema::Enum(enumeration) => {
            names.insert(fullname(&enumeration.name), schema);
        }
        Schema::Fixed(fixed) => {
            names.insert(fullname(&fixed.name), schema);
        }
        Schema::Array(items) => collect_names(items, names),
        Schema::Map(values) => collect_names(values, names),
        Schema::Union(union) => {
            for variant in union.variants() {
                collect_names(variant, names);
            }
        }
        _ => {}
    }
}

fn fullname(name: &Name) -> String {
    name.fullname(None)
}

/// Name a union branch is tagged with in JSON form
pub(crate) fn branch_name(schema: &Schema) -> String {
    match schema {
        Schema::Null => "null".to_string(),
        Schema::Boolean => "boolean".to_string(),
        Schema::Int => "int".to_string(),
        Schema::Long => "long".to_string(),
        Schema::Float => "float".to_string(),
        Schema::Double => "double".to_string(),
        Schema::Bytes => "bytes".to_string(),
        Schema::String => "string".to_string(),
        Schema::Array(_) => "array".to_string(),
        Schema::Map(_) => "map".to_string(),
        Schema::Record(record) => fullname(&record.name),
        Schema::Enum(enumeration) => fullname(&enumeration.name),
        Schema::Fixed(fixed) => fullname(&fixed.name),
        Schema::Ref { name } => fullname(name),
        other => format!("{:?}", SchemaKind::from(other)).to_lowercase(),
    }
}

/// Named branches may also be tagged with their short name
fn branch_matches(schema: &Schema, tag: &str) -> bool {
    let name = branch_name(schema);
    name == tag || name.rsplit('.').next() == Some(tag)
}

/// Convert a JSON-form value into an Avro value shaped by `schema`.
///
/// Offending values are carried over as-is so the schema's own validation
/// still rejects the result; their paths are returned alongside.
pub fn to_avro(schema: &Schema, value: &Value) -> (AvroValue, ValidationContext) {
    let mut converter = ToAvro {
        names: Names::collect(schema),
        path: Vec::new(),
        context: ValidationContext::default(),
    };
    let converted = converter.convert(schema, value);
    (converted, converter.context)
}

struct ToAvro<'s> {
    names: Names<'s>,
    path: Vec<String>,
    context: ValidationContext,
}

impl<'s> ToAvro<'s> {
    fn convert(&mut self, schema: &'s Schema, value: &Value) -> AvroValue {
        let Some(schema) = self.names.resolve(schema) else {
            return self.invalid(value);
        };

        let converted = match (schema, value) {
            (Schema::Null, Value::Null) => Some(AvroValue::Null),
            (Schema::Boolean, Value::Bool(b)) => Some(AvroValue::Boolean(*b)),
            (Schema::Int, Value::Number(n)) => n
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(AvroValue::Int),
            (Schema::Long, Value::Number(n)) => n.as_i64().map(AvroValue::Long),
            (Schema::Float, Value::Number(n)) => n.as_f64().map(|n| AvroValue::Float(n as f32)),
            (Schema::Double, Value::Number(n)) => n.as_f64().map(AvroValue::Double),
            (Schema::String, Value::String(s)) => Some(AvroValue::String(s.clone())),
            (Schema::Bytes, Value::String(s)) => Some(AvroValue::Bytes(s.as_bytes().to_vec())),
            (Schema::Enum(enumeration), Value::String(symbol)) => enumeration
                .symbols
                .iter()
                .position(|s| s == symbol)
                .map(|index| AvroValue::Enum(index as u32, symbol.clone())),

            (Schema::Array(items), Value::Array(elements)) => Some(AvroValue::Array(
                elements
                    .iter()
                    .enumerate()
                    .map(|(i, element)| self.at(i.to_string(), |c| c.convert(items, element)))
                    .collect(),
            )),
            (Schema::Map(values), Value::Object(entries)) => Some(AvroValue::Map(
                entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), self.at(key.clone(), |c| c.convert(values, entry))))
                    .collect(),
            )),
            (Schema::Record(record), Value::Object(object)) => Some(self.record(record, object)),
            (Schema::Union(union), _) => self.union(union, value),

            // logical types and shape mismatches
            (other, _) => {
                let raw = AvroValue::from(value.clone());
                raw.validate(other).then_some(raw)
            }
        };

        match converted {
            Some(converted) => converted,
            None => self.invalid(value),
        }
    }

    fn record(&mut self, record: &'s RecordSchema, object: &Map<String, Value>) -> AvroValue {
        let mut fields = Vec::with_capacity(record.fields.len());

        for field in &record.fields {
            let name = field.name.clone();
            let value = match (object.get(&field.name), &field.default) {
                (Some(value), _) => self.at(name.clone(), |c| c.convert(&field.schema, value)),
                (None, Some(default)) => self.at(name.clone(), |c| c.default_value(&field.schema, default)),
                (None, None) => self.at(name.clone(), |c| c.invalid(&Value::Null)),
            };
            fields.push((name, value));
        }

        AvroValue::Record(fields)
    }

    /// Field defaults are untagged and belong to a union's first branch
    fn default_value(&mut self, schema: &'s Schema, default: &Value) -> AvroValue {
        match self.names.resolve(schema) {
            Some(Schema::Union(union)) => match union.variants().first() {
                Some(first) => AvroValue::Union(0, Box::new(self.convert(first, default))),
                None => self.invalid(default),
            },
            _ => self.convert(schema, default),
        }
    }

    fn union(&mut self, union: &'s UnionSchema, value: &Value) -> Option<AvroValue> {
        let variants = union.variants();

        match value {
            Value::Null => variants
                .iter()
                .position(|variant| matches!(variant, Schema::Null))
                .map(|index| AvroValue::Union(index as u32, Box::new(AvroValue::Null))),
            Value::Object(object) if object.len() == 1 => {
                let (tag, inner) = object.iter().next()?;
                let index = variants
                    .iter()
                    .position(|variant| branch_matches(variant, tag))?;
                let converted = self.at(tag.clone(), |c| c.convert(&variants[index], inner));
                Some(AvroValue::Union(index as u32, Box::new(converted)))
            }
            _ => None,
        }
    }

    fn at(&mut self, segment: String, f: impl FnOnce(&mut Self) -> AvroValue) -> AvroValue {
        self.path.push(segment);
        let converted = f(self);
        self.path.pop();
        converted
    }

    fn invalid(&mut self, value: &Value) -> AvroValue {
        self.context.invalid_paths.push(self.path.join("."));
        self.context.invalid_data.push(value.clone());
        AvroValue::from(value.clone())
    }
}

/// Convert a decoded Avro value back into JSON form
pub fn from_avro(schema: &Schema, value: &AvroValue) -> Result<Value> {
    let names = Names::collect(schema);
    json_of(&names, schema, value)
}

fn json_of<'s>(names: &Names<'s>, schema: &'s Schema, value: &AvroValue) -> Result<Value> {
    let schema = names
        .resolve(schema)
        .ok_or_else(|| Error::encoding(format!("Unknown named type {}", branch_name(schema))))?;

    let json = match (schema, value) {
        (Schema::Union(union), AvroValue::Union(index, inner)) => {
            let variant = union
                .variants()
                .get(*index as usize)
                .ok_or_else(|| Error::encoding(format!("Union branch {} out of range", index)))?;
            match inner.as_ref() {
                AvroValue::Null => Value::Null,
                inner => {
                    let mut object = Map::new();
                    object.insert(branch_name(variant), json_of(names, variant, inner)?);
                    Value::Object(object)
                }
            }
        }
        (Schema::Record(record), AvroValue::Record(fields)) => {
            let mut object = Map::new();
            for (name, field_value) in fields {
                let field = record
                    .fields
                    .iter()
                    .find(|field| &field.name == name)
                    .ok_or_else(|| Error::encoding(format!("Unknown record field {}", name)))?;
                object.insert(name.clone(), json_of(names, &field.schema, field_value)?);
            }
            Value::Object(object)
        }
        (Schema::Array(items), AvroValue::Array(elements)) => Value::Array(
            elements
                .iter()
                .map(|element| json_of(names, items, element))
                .collect::<Result<_>>()?,
        ),
        (Schema::Map(values), AvroValue::Map(entries)) => Value::Object(
            entries
                .iter()
                .map(|(key, entry)| Ok((key.clone(), json_of(names, values, entry)?)))
                .collect::<Result<_>>()?,
        ),
        (_, AvroValue::Null) => Value::Null,
        (_, AvroValue::Boolean(b)) => Value::Bool(*b),
        (_, AvroValue::Int(n)) => Value::from(*n),
        (_, AvroValue::Long(n)) => Value::from(*n),
        (_, AvroValue::Float(n)) => float(f64::from(*n)),
        (_, AvroValue::Double(n)) => float(*n),
        (_, AvroValue::String(s)) | (_, AvroValue::Enum(_, s)) => Value::String(s.clone()),
        (_, AvroValue::Bytes(bytes)) => Value::from(bytes.clone()),
        (schema, other) => {
            return Err(Error::encoding(format!(
                "Cannot read {:?} as {}",
                other,
                branch_name(schema)
            )))
        }
    };

    Ok(json)
}

fn float(n: f64) -> Value {
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}
