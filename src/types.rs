//! Core value types: the CloudEvents envelope, the NATS-Streaming message
//! record, and the small closed enums that tag formats and targets.

use crate::error::{EventError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Read access to a CloudEvents-compatible envelope
///
/// Anything implementing `Event` can be normalized and published.
/// Required accessors must return non-empty strings for the value to
/// serialize.
pub trait Event {
    /// Dot-separated hierarchical type, e.g. `io.example.user.created`
    fn event_type(&self) -> &str;

    fn event_type_version(&self) -> Option<&str>;

    /// CloudEvents spec version this envelope conforms to
    fn cloud_events_version(&self) -> &str;

    /// Identifier of the emitting service
    fn source(&self) -> &str;

    /// Unique id of this event instance
    fn event_id(&self) -> &str;

    fn event_time(&self) -> Option<DateTime<Utc>>;

    fn schema_url(&self) -> Option<&str>;

    /// MIME type of `data`
    fn content_type(&self) -> Option<&str>;

    /// Vendor/user extension attributes
    fn extensions(&self) -> Option<&Map<String, Value>>;

    /// Opaque body
    fn data(&self) -> Option<&Value>;

    /// Copy this envelope into an owned `Payload`
    fn to_payload(&self) -> Payload {
        Payload {
            event_type: self.event_type().to_string(),
            event_type_version: self.event_type_version().map(str::to_string),
            cloud_events_version: self.cloud_events_version().to_string(),
            source: self.source().to_string(),
            event_id: self.event_id().to_string(),
            event_time: self.event_time(),
            schema_url: self.schema_url().map(str::to_string),
            content_type: self.content_type().map(str::to_string),
            extensions: self.extensions().cloned(),
            data: self.data().filter(|d| !d.is_null()).cloned(),
        }
    }
}

/// Immutable CloudEvents envelope
///
/// Built with [`PayloadBuilder`](crate::builder::PayloadBuilder) or decoded
/// by the codec. Equality compares all ten fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub(crate) event_type: String,
    pub(crate) event_type_version: Option<String>,
    pub(crate) cloud_events_version: String,
    pub(crate) source: String,
    pub(crate) event_id: String,
    pub(crate) event_time: Option<DateTime<Utc>>,
    pub(crate) schema_url: Option<String>,
    pub(crate) content_type: Option<String>,
    pub(crate) extensions: Option<Map<String, Value>>,
    pub(crate) data: Option<Value>,
}

impl Payload {
    /// Create an envelope carrying only the required fields
    pub fn new(
        event_type: impl Into<String>,
        cloud_events_version: impl Into<String>,
        source: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_type_version: None,
            cloud_events_version: cloud_events_version.into(),
            source: source.into(),
            event_id: event_id.into(),
            event_time: None,
            schema_url: None,
            content_type: None,
            extensions: None,
            data: None,
        }
    }

    /// Start a builder
    pub fn builder() -> crate::builder::PayloadBuilder {
        crate::builder::PayloadBuilder::new()
    }

    /// Consume the envelope and return its body
    pub fn into_data(self) -> Option<Value> {
        self.data
    }
}

impl Event for Payload {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn event_type_version(&self) -> Option<&str> {
        self.event_type_version.as_deref()
    }

    fn cloud_events_version(&self) -> &str {
        &self.cloud_events_version
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn event_id(&self) -> &str {
        &self.event_id
    }

    fn event_time(&self) -> Option<DateTime<Utc>> {
        self.event_time
    }

    fn schema_url(&self) -> Option<&str> {
        self.schema_url.as_deref()
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn extensions(&self) -> Option<&Map<String, Value>> {
        self.extensions.as_ref()
    }

    fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    fn to_payload(&self) -> Payload {
        self.clone()
    }
}

/// Acknowledgement hook attached to an inbound delivery
///
/// Transports without acknowledgement leave this unset.
pub type AckFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// NATS-Streaming subscription record
///
/// Carries the JSON envelope as text in `data`. Equality ignores the
/// acknowledgement hook.
#[derive(Clone)]
pub struct Message {
    pub(crate) sequence: u64,
    pub(crate) subject: String,
    pub(crate) data: String,
    pub(crate) timestamp: i64,
    acker: Option<AckFn>,
}

impl Message {
    pub fn new(
        sequence: u64,
        subject: impl Into<String>,
        data: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            sequence,
            subject: subject.into(),
            data: data.into(),
            timestamp,
            acker: None,
        }
    }

    /// Server-assigned sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Raw envelope text
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Nanoseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// `timestamp` as a UTC instant
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.timestamp)
    }

    pub(crate) fn with_acker(mut self, acker: Option<AckFn>) -> Self {
        self.acker = acker;
        self
    }

    /// Acknowledge the underlying transport message
    ///
    /// No-op when the delivery carried no acknowledgement hook.
    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(ack) => ack().await,
            None => Ok(()),
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
            && self.subject == other.subject
            && self.data == other.data
            && self.timestamp == other.timestamp
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("sequence", &self.sequence)
            .field("subject", &self.subject)
            .field("data", &self.data)
            .field("timestamp", &self.timestamp)
            .field("ackable", &self.acker.is_some())
            .finish()
    }
}

/// Wire formats understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// CloudEvents JSON envelope
    Json,
    /// NATS-Streaming `key: value` line record wrapping a JSON envelope
    Streaming,
}

impl Format {
    /// Wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Streaming => "nats-streaming",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Format::Json),
            "nats-streaming" => Ok(Format::Streaming),
            other => Err(EventError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Closed set of deserialization targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// CloudEvents envelope (`Payload`)
    Payload,
    /// NATS-Streaming record (`Message`)
    Message,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Payload => "payload",
            MessageKind::Message => "message",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "payload" | "event" => Ok(MessageKind::Payload),
            "message" => Ok(MessageKind::Message),
            other => Err(EventError::InvalidType(other.to_string())),
        }
    }
}

/// When a subscriber's delivery is acknowledged relative to `handle`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge before the handler runs
    Before,
    /// Acknowledge once the handler returns successfully
    #[default]
    After,
    /// The handler acknowledges through the delivery
    Manual,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_payload_new_has_no_optionals() {
        let payload = Payload::new("io.example.created", "0.1", "svc", "evt-1");
        assert_eq!(payload.event_type(), "io.example.created");
        assert_eq!(payload.cloud_events_version(), "0.1");
        assert_eq!(payload.source(), "svc");
        assert_eq!(payload.event_id(), "evt-1");
        assert!(payload.event_type_version().is_none());
        assert!(payload.event_time().is_none());
        assert!(payload.extensions().is_none());
        assert!(payload.data().is_none());
    }

    #[test]
    fn test_payload_value_equality() {
        let a = Payload::new("t", "0.1", "s", "1");
        let b = Payload::new("t", "0.1", "s", "1");
        let c = Payload::new("t", "0.1", "s", "2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    struct Borrowed<'a> {
        id: &'a str,
        body: Value,
    }

    impl Event for Borrowed<'_> {
        fn event_type(&self) -> &str {
            "io.example.borrowed"
        }
        fn event_type_version(&self) -> Option<&str> {
            Some("2.0")
        }
        fn cloud_events_version(&self) -> &str {
            "0.1"
        }
        fn source(&self) -> &str {
            "test"
        }
        fn event_id(&self) -> &str {
            self.id
        }
        fn event_time(&self) -> Option<DateTime<Utc>> {
            None
        }
        fn schema_url(&self) -> Option<&str> {
            None
        }
        fn content_type(&self) -> Option<&str> {
            None
        }
        fn extensions(&self) -> Option<&Map<String, Value>> {
            None
        }
        fn data(&self) -> Option<&Value> {
            Some(&self.body)
        }
    }

    #[test]
    fn test_to_payload_copies_fields_and_drops_null_data() {
        let payload = Borrowed {
            id: "abc",
            body: Value::Null,
        }
        .to_payload();
        assert_eq!(payload.event_id(), "abc");
        assert_eq!(payload.event_type_version(), Some("2.0"));
        assert!(payload.data().is_none());
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(Format::Json.to_string(), "json");
        assert_eq!("nats-streaming".parse::<Format>().unwrap(), Format::Streaming);
        let err = "xml".parse::<Format>().unwrap_err();
        assert!(matches!(err, EventError::UnsupportedFormat(ref f) if f == "xml"));
    }

    #[test]
    fn test_message_kind_parse() {
        assert_eq!("payload".parse::<MessageKind>().unwrap(), MessageKind::Payload);
        assert_eq!("event".parse::<MessageKind>().unwrap(), MessageKind::Payload);
        assert_eq!("message".parse::<MessageKind>().unwrap(), MessageKind::Message);
        let err = "Foo\\Bar".parse::<MessageKind>().unwrap_err();
        assert!(matches!(err, EventError::InvalidType(ref t) if t == "Foo\\Bar"));
    }

    #[test]
    fn test_ack_mode_default() {
        assert_eq!(AckMode::default(), AckMode::After);
    }

    #[test]
    fn test_message_equality_ignores_acker() {
        let ack: AckFn = Arc::new(|| -> BoxFuture<'static, Result<()>> { Box::pin(async { Ok(()) }) });
        let plain = Message::new(1, "a", "{}", 10);
        let acked = Message::new(1, "a", "{}", 10).with_acker(Some(ack));
        assert_eq!(plain, acked);
    }

    #[tokio::test]
    async fn test_message_ack_invokes_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ack: AckFn = Arc::new(move || -> BoxFuture<'static, Result<()>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });
        let message = Message::new(1, "a", "{}", 10).with_acker(Some(ack));

        message.ack().await.unwrap();
        Message::new(2, "b", "{}", 11).ack().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_message_time_from_nanos() {
        let message = Message::new(17, "some.channel", "{}", 1_532_525_124_250_055_719);
        assert_eq!(message.time().timestamp(), 1_532_525_124);
        assert_eq!(message.time().timestamp_subsec_nanos(), 250_055_719);
    }
}
