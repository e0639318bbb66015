//! JSON envelope decoder and encoder

use super::{Decoder, Encoder, FieldMap};
use crate::error::{EventError, Result};
use crate::schema::{FieldSchema, PAYLOAD};
use crate::types::Format;
use serde_json::Value;

/// Parses JSON text into a field map padded against a schema
#[derive(Debug, Clone, Copy)]
pub struct JsonDecoder {
    schema: FieldSchema,
}

impl JsonDecoder {
    pub fn new(schema: FieldSchema) -> Self {
        Self { schema }
    }
}

impl Default for JsonDecoder {
    fn default() -> Self {
        Self::new(PAYLOAD)
    }
}

impl Decoder for JsonDecoder {
    fn supports_decoding(&self, format: Format) -> bool {
        format == Format::Json
    }

    fn decode(&self, data: &str, format: Format) -> Result<FieldMap> {
        if !self.supports_decoding(format) {
            return Err(EventError::UnsupportedFormat(format.to_string()));
        }

        match serde_json::from_str::<Value>(data)? {
            Value::Object(map) => Ok(self.schema.pad(map)),
            other => Err(EventError::Decode {
                format: format.to_string(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }
}

/// Formats a field map as compact JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn supports_encoding(&self, format: Format) -> bool {
        format == Format::Json
    }

    fn encode(&self, data: &FieldMap, format: Format) -> Result<String> {
        if !self.supports_encoding(format) {
            return Err(EventError::UnsupportedFormat(format.to_string()));
        }
        Ok(serde_json::to_string(data)?)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
