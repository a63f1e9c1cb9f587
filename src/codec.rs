//! JSON-lines mapping between input/output text and [`Record`]s.
//!
//! Only the source and sink layers use this; stages never see JSON.

use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use thiserror::Error;

use crate::config::OutputFormat;
use crate::error::PipelineError;
use crate::record::{Record, Schema, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("expected a JSON array or object, got {0}")]
    Shape(&'static str),

    #[error("field {field}: nested arrays and objects are not field values")]
    Nested { field: String },

    #[error(transparent)]
    Record(#[from] PipelineError),
}

/// Decode one input line. `Ok(None)` means the line was blank.
pub fn decode_line(schema: &Arc<Schema>, line: &str) -> Result<Option<Record>, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: JsonValue =
        serde_json::from_str(line).map_err(|e| DecodeError::Json(e.to_string()))?;
    decode_value(schema, parsed).map(Some)
}

pub fn decode_value(schema: &Arc<Schema>, value: JsonValue) -> Result<Record, DecodeError> {
    match value {
        JsonValue::Array(items) => {
            let mut record = Record::empty(schema);
            for (index, item) in items.into_iter().enumerate() {
                let value = field_value(item, || index.to_string())?;
                record.set(index, value)?;
            }
            Ok(record)
        }
        JsonValue::Object(map) => {
            let mut record = Record::empty(schema);
            for (name, item) in map {
                let value = field_value(item, || name.clone())?;
                record.set_by_name(&name, value)?;
            }
            Ok(record)
        }
        JsonValue::Null => Err(DecodeError::Shape("null")),
        JsonValue::Bool(_) => Err(DecodeError::Shape("bool")),
        JsonValue::Number(_) => Err(DecodeError::Shape("number")),
        JsonValue::String(_) => Err(DecodeError::Shape("string")),
    }
}

fn field_value(item: JsonValue, field: impl FnOnce() -> String) -> Result<Value, DecodeError> {
    Value::from_json(item).ok_or_else(|| DecodeError::Nested { field: field() })
}

/// Encode one emitted record as a single JSON line (no trailing newline)
pub fn encode_record(record: &Record, format: OutputFormat) -> String {
    match format {
        OutputFormat::Array => {
            let fields: Vec<JsonValue> = record.fields().iter().cloned().map(to_json).collect();
            JsonValue::Array(fields).to_string()
        }
        OutputFormat::Object => {
            let mut map = Map::with_capacity(record.len());
            for (name, index) in record.schema().names() {
                let value = record.fields().get(index).cloned().unwrap_or_default();
                map.insert(name.to_string(), to_json(value));
            }
            JsonValue::Object(map).to_string()
        }
    }
}

fn to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(b),
        Value::Int(i) => JsonValue::from(i),
        Value::Float(x) => serde_json::Number::from_f64(x)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Str(s) => JsonValue::String(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Arc<Schema> {
        Schema::new(["host", "method", "path"]).unwrap()
    }

    #[test]
    fn test_decode_positional() {
        let record = decode_line(&schema(), r#"["a", "GET", 3]"#).unwrap().unwrap();
        assert_eq!(record.get(0).unwrap(), &Value::from("a"));
        assert_eq!(record.get(2).unwrap(), &Value::Int(3));

        let short = decode_line(&schema(), r#"["a"]"#).unwrap().unwrap();
        assert!(short.get(2).unwrap().is_null());
    }

    #[test]
    fn test_decode_by_name() {
        let record = decode_line(&schema(), r#"{"path": "/x", "host": "h"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(record.get_by_name("path").unwrap().as_str(), Some("/x"));
        assert!(record.get(1).unwrap().is_null());
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        assert_eq!(decode_line(&schema(), "   ").unwrap(), None);
    }

    #[test]
    fn test_decode_errors() {
        let schema = schema();
        assert!(matches!(
            decode_line(&schema, "[1, 2"),
            Err(DecodeError::Json(_))
        ));
        assert_eq!(
            decode_line(&schema, "42").unwrap_err(),
            DecodeError::Shape("number")
        );
        assert_eq!(
            decode_line(&schema, r#"[1, 2, 3, 4]"#).unwrap_err(),
            DecodeError::Record(PipelineError::OutOfRange { index: 3, len: 3 })
        );
        assert_eq!(
            decode_line(&schema, r#"{"verb": "GET"}"#).unwrap_err(),
            DecodeError::Record(PipelineError::UnknownField("verb".into()))
        );
        assert_eq!(
            decode_line(&schema, r#"{"host": [1]}"#).unwrap_err(),
            DecodeError::Nested {
                field: "host".into()
            }
        );
    }

    #[test]
    fn test_encode_formats() {
        let schema = schema();
        let record = Record::from_values(&schema, ["h", "GET"]).unwrap();
        assert_eq!(
            encode_record(&record, OutputFormat::Array),
            r#"["h","GET",null]"#
        );
        assert_eq!(
            encode_record(&record, OutputFormat::Object),
            r#"{"host":"h","method":"GET","path":null}"#
        );
    }

    #[test]
    fn test_encode_non_finite_float() {
        let schema = schema();
        let record = Record::from_values(&schema, [f64::NAN]).unwrap();
        assert_eq!(
            encode_record(&record, OutputFormat::Array),
            "[null,null,null]"
        );
    }
}
