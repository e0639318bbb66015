//! Error types for nats-cloudevents

use crate::types::{Event, Payload};
use thiserror::Error;

/// Errors raised by the codec, the builder, and the connection adapter
#[derive(Debug, Error)]
pub enum EventError {
    /// Transport connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Low-level transport write failure
    #[error("Failed to send to subject '{subject}': {reason}")]
    Send {
        subject: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to subject '{subject}': {reason}")]
    Subscribe {
        subject: String,
        reason: String,
    },

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A codec was asked for a format it is not bound to
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The denormalizer cannot produce the requested type
    #[error("Unsupported type '{type_name}' for format '{format}'")]
    UnsupportedType {
        type_name: String,
        format: String,
    },

    /// The normalizer cannot read the value it was handed
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    /// Required fields absent (or null) in a field map
    #[error("Missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<String> },

    /// Fields outside the supported set present in a field map
    #[error("Unsupported fields present: {}", .fields.join(", "))]
    ExtraFields { fields: Vec<String> },

    /// Unrecognised key in a NATS-Streaming line record
    #[error("Unknown field '{0}' in message record")]
    UnknownField(String),

    /// A non-blank line that is not a `key: value` record
    #[error("Malformed message record line: {0:?}")]
    MalformedRecord(String),

    /// Wire data could not be turned into a field map
    #[error("Failed to decode {format} data: {reason}")]
    Decode {
        format: String,
        reason: String,
    },

    /// A field map value has the wrong shape for its field
    #[error("Cannot denormalize field '{field}': {reason}")]
    Denormalization {
        field: String,
        reason: String,
    },

    /// `build()` called before every required field was set
    #[error("Cannot build payload, missing required fields: {}", .missing.join(", "))]
    Builder { missing: Vec<String> },

    /// An outbound event cannot be serialized
    #[error("Invalid event '{event_id}' of type '{event_type}': {reason}")]
    InvalidEvent {
        event_type: String,
        event_id: String,
        reason: String,
    },

    /// A deserialization target name outside the known message kinds
    #[error("Invalid message type: {0}")]
    InvalidType(String),

    /// A request/reply cycle did not complete
    #[error("Request '{}' on '{}' failed: {reason}", .request.event_id(), .request.event_type())]
    RequestFailed {
        request: Box<Payload>,
        reason: String,
    },

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message-type registry failure
    #[error("Registry error: {0}")]
    Registry(String),
}

/// Result type alias for event operations
pub type Result<T> = std::result::Result<T, EventError>;
