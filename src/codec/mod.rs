//! Wire codec — field maps between typed values and wire text
//!
//! Serialization runs in two steps in each direction:
//!
//! - **normalize** a typed value into a [`FieldMap`], then **encode** the
//!   map into wire text
//! - **decode** wire text into a `FieldMap` padded with nulls, then
//!   **denormalize** the map into a typed value
//!
//! Each step is a trait so the JSON envelope and the NATS-Streaming line
//! record can share the composed [`Deserializer`].

pub mod json;
pub mod payload;
pub mod serializer;
pub mod streaming;

pub use json::{JsonDecoder, JsonEncoder};
pub use payload::{PayloadDenormalizer, PayloadNormalizer};
pub use serializer::{Deserialized, Deserializer, Serializer};
pub use streaming::{MessageDecoder, MessageDenormalizer, MessageEncoder, MessageNormalizer};

use crate::error::Result;
use crate::types::{Format, MessageKind};
use serde_json::Value;

/// Ordered field-name → raw-value mapping
pub type FieldMap = serde_json::Map<String, Value>;

/// Wire text → field map
pub trait Decoder: Send + Sync {
    /// True only for the format this decoder is bound to
    fn supports_decoding(&self, format: Format) -> bool;

    /// Parse `data`, inserting null for every declared field it lacks
    fn decode(&self, data: &str, format: Format) -> Result<FieldMap>;
}

/// Field map → wire text
pub trait Encoder: Send + Sync {
    fn supports_encoding(&self, format: Format) -> bool;

    fn encode(&self, data: &FieldMap, format: Format) -> Result<String>;
}

/// Typed value → field map
pub trait Normalizer<T: ?Sized>: Send + Sync {
    /// Whether `value` carries everything the map needs
    fn supports_normalization(&self, value: &T) -> bool;

    /// Produce the full field map in schema order
    fn normalize(&self, value: &T) -> Result<FieldMap>;
}

/// Field map → typed value
pub trait Denormalizer: Send + Sync {
    type Output;

    /// The message kind this denormalizer produces
    fn kind(&self) -> MessageKind;

    /// Full pre-check: format, kind, required and unknown fields
    fn supports_denormalization(&self, data: &Value, kind: MessageKind, format: Format) -> bool;

    fn denormalize(&self, data: FieldMap, kind: MessageKind, format: Format)
        -> Result<Self::Output>;
}
