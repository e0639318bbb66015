//! Fluent construction of `Payload` values

use crate::error::{EventError, Result};
use crate::response;
use crate::schema::PAYLOAD;
use crate::types::{Event, Payload};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// CloudEvents version stamped by [`PayloadBuilder::with_defaults`]
pub const DEFAULT_CLOUD_EVENTS_VERSION: &str = "0.1";

/// Accumulates envelope fields and produces a `Payload`
///
/// Setters never validate; `build()` reports every missing required
/// field at once. `build()` borrows the builder, so it may be called
/// again and yields an equal value.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    event_type: Option<String>,
    event_type_version: Option<String>,
    cloud_events_version: Option<String>,
    source: Option<String>,
    event_id: Option<String>,
    event_time: Option<DateTime<Utc>>,
    schema_url: Option<String>,
    content_type: Option<String>,
    extensions: Option<Map<String, Value>>,
    data: Option<Value>,
}

impl PayloadBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with a generated event id, the current time, and
    /// the default CloudEvents version
    pub fn with_defaults(source: impl Into<String>) -> Self {
        Self::new()
            .cloud_events_version(DEFAULT_CLOUD_EVENTS_VERSION)
            .source(source)
            .event_id(format!("evt-{}", uuid::Uuid::new_v4()))
            .event_time(Utc::now())
    }

    /// Create a builder for the reply to `request`
    ///
    /// Presets the correlated `eventType`/`eventId` and copies the
    /// request's CloudEvents version and source.
    pub fn response_to<E: Event + ?Sized>(request: &E) -> Self {
        Self::new()
            .event_type(response::response_event_type(request))
            .event_id(response::response_event_id(request))
            .cloud_events_version(request.cloud_events_version())
            .source(request.source())
    }

    pub fn event_type(mut self, value: impl Into<String>) -> Self {
        self.event_type = Some(value.into());
        self
    }

    pub fn event_type_version(mut self, value: impl Into<String>) -> Self {
        self.event_type_version = Some(value.into());
        self
    }

    pub fn cloud_events_version(mut self, value: impl Into<String>) -> Self {
        self.cloud_events_version = Some(value.into());
        self
    }

    pub fn source(mut self, value: impl Into<String>) -> Self {
        self.source = Some(value.into());
        self
    }

    pub fn event_id(mut self, value: impl Into<String>) -> Self {
        self.event_id = Some(value.into());
        self
    }

    pub fn event_time(mut self, value: DateTime<Utc>) -> Self {
        self.event_time = Some(value);
        self
    }

    pub fn schema_url(mut self, value: impl Into<String>) -> Self {
        self.schema_url = Some(value.into());
        self
    }

    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    /// Replace all extension attributes
    pub fn extensions(mut self, value: Map<String, Value>) -> Self {
        self.extensions = Some(value);
        self
    }

    /// Add one extension attribute
    pub fn extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the body; a JSON `null` clears it
    pub fn data(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.data = (!value.is_null()).then_some(value);
        self
    }

    /// Produce the payload, or list every unset required field
    pub fn build(&self) -> Result<Payload> {
        let missing: Vec<String> = PAYLOAD
            .required_fields()
            .filter(|name| !self.is_set(name))
            .map(str::to_string)
            .collect();

        if !missing.is_empty() {
            return Err(EventError::Builder { missing });
        }

        Ok(Payload {
            event_type: self.event_type.clone().unwrap_or_default(),
            event_type_version: self.event_type_version.clone(),
            cloud_events_version: self.cloud_events_version.clone().unwrap_or_default(),
            source: self.source.clone().unwrap_or_default(),
            event_id: self.event_id.clone().unwrap_or_default(),
            event_time: self.event_time,
            schema_url: self.schema_url.clone(),
            content_type: self.content_type.clone(),
            extensions: self.extensions.clone(),
            data: self.data.clone(),
        })
    }

    fn is_set(&self, field: &str) -> bool {
        match field {
            "eventType" => self.event_type.is_some(),
            "eventTypeVersion" => self.event_type_version.is_some(),
            "cloudEventsVersion" => self.cloud_events_version.is_some(),
            "source" => self.source.is_some(),
            "eventId" => self.event_id.is_some(),
            "eventTime" => self.event_time.is_some(),
            "schemaURL" => self.schema_url.is_some(),
            "contentType" => self.content_type.is_some(),
            "extensions" => self.extensions.is_some(),
            "data" => self.data.is_some(),
            _ => false,
        }
    }
}
