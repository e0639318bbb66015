//! Subscriber contract and per-delivery context

use crate::error::{EventError, Result};
use crate::transport::RawMessage;
use crate::types::{AckFn, AckMode, Event, Message, Payload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Conversion from a decoded envelope into a subscriber's event type
pub trait FromPayload: Sized + Send + 'static {
    fn from_payload(payload: Payload) -> Result<Self>;
}

impl FromPayload for Payload {
    fn from_payload(payload: Payload) -> Result<Self> {
        Ok(payload)
    }
}

/// Envelope whose `data` has been deserialized into `T`
#[derive(Debug, Clone, PartialEq)]
pub struct TypedEvent<T> {
    envelope: Payload,
    body: T,
}

impl<T> TypedEvent<T> {
    /// The deserialized body
    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn into_body(self) -> T {
        self.body
    }

    pub fn envelope(&self) -> &Payload {
        &self.envelope
    }
}

impl<T: DeserializeOwned + Send + 'static> FromPayload for TypedEvent<T> {
    fn from_payload(payload: Payload) -> Result<Self> {
        let raw = payload.data.clone().unwrap_or(Value::Null);
        let body = serde_json::from_value(raw).map_err(|e| EventError::Denormalization {
            field: "data".to_string(),
            reason: format!("body does not match {}: {}", std::any::type_name::<T>(), e),
        })?;
        Ok(Self {
            envelope: payload,
            body,
        })
    }
}

impl<T> Event for TypedEvent<T> {
    fn event_type(&self) -> &str {
        self.envelope.event_type()
    }

    fn event_type_version(&self) -> Option<&str> {
        self.envelope.event_type_version()
    }

    fn cloud_events_version(&self) -> &str {
        self.envelope.cloud_events_version()
    }

    fn source(&self) -> &str {
        self.envelope.source()
    }

    fn event_id(&self) -> &str {
        self.envelope.event_id()
    }

    fn event_time(&self) -> Option<DateTime<Utc>> {
        self.envelope.event_time()
    }

    fn schema_url(&self) -> Option<&str> {
        self.envelope.schema_url()
    }

    fn content_type(&self) -> Option<&str> {
        self.envelope.content_type()
    }

    fn extensions(&self) -> Option<&Map<String, Value>> {
        self.envelope.extensions()
    }

    fn data(&self) -> Option<&Value> {
        self.envelope.data()
    }
}

/// Context of one inbound delivery
pub struct Delivery {
    subject: String,
    reply: Option<String>,
    message: Option<Message>,
    acker: Option<AckFn>,
}

impl Delivery {
    pub(crate) fn new(raw: &RawMessage, message: Option<Message>) -> Self {
        Self {
            subject: raw.subject.clone(),
            reply: raw.reply.clone(),
            message,
            acker: raw.acker(),
        }
    }

    /// Subject the event arrived on
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Reply subject, when the sender expects a response
    pub fn reply(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    /// The NATS-Streaming record, for streaming transports
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.message.as_ref().map(Message::sequence)
    }

    /// Acknowledge the delivery; no-op on transports without acks
    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(ack) => ack().await,
            None => Ok(()),
        }
    }
}

/// Receives deliveries that failed to decode
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Return `Ok` to swallow the failure, `Err` to pass it to the transport
    async fn handle_error(&self, error: EventError, raw: &RawMessage) -> Result<()>;
}

/// Default handler: hand the error straight back
#[derive(Debug, Clone, Copy, Default)]
pub struct Rethrow;

#[async_trait]
impl ErrorHandler for Rethrow {
    async fn handle_error(&self, error: EventError, _raw: &RawMessage) -> Result<()> {
        Err(error)
    }
}

/// Typed consumer of decoded events
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Type each delivery is decoded into
    type Event: FromPayload;

    async fn handle(&self, event: Self::Event, delivery: &Delivery) -> Result<()>;

    /// When deliveries are acknowledged
    fn ack_mode(&self) -> AckMode {
        AckMode::After
    }

    /// Auxiliary message types this subscriber may find embedded in bodies
    fn uses(&self) -> Vec<String> {
        Vec::new()
    }

    /// Own handler for decode failures; `None` falls back to the
    /// connection's default
    fn error_handler(&self) -> Option<&dyn ErrorHandler> {
        None
    }
}
