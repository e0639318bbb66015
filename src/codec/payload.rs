//! Normalizer and denormalizer for the CloudEvents envelope

use super::{Denormalizer, FieldMap, Normalizer};
use crate::error::{EventError, Result};
use crate::schema::PAYLOAD;
use crate::types::{Event, Format, MessageKind, Payload};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Turns any [`Event`] into the ten-field envelope map
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadNormalizer;

impl<E: Event + ?Sized> Normalizer<E> for PayloadNormalizer {
    fn supports_normalization(&self, value: &E) -> bool {
        unset_required(value).is_empty()
    }

    fn normalize(&self, value: &E) -> Result<FieldMap> {
        let unset = unset_required(value);
        if !unset.is_empty() {
            return Err(EventError::UnsupportedValue(format!(
                "required fields are empty: {}",
                unset.join(", ")
            )));
        }

        let mut map = FieldMap::with_capacity(PAYLOAD.fields().len());
        map.insert("eventType".into(), value.event_type().into());
        map.insert("eventTypeVersion".into(), optional(value.event_type_version()));
        map.insert(
            "cloudEventsVersion".into(),
            value.cloud_events_version().into(),
        );
        map.insert("source".into(), value.source().into());
        map.insert("eventId".into(), value.event_id().into());
        map.insert(
            "eventTime".into(),
            value
                .event_time()
                .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                .unwrap_or(Value::Null),
        );
        map.insert("schemaURL".into(), optional(value.schema_url()));
        map.insert("contentType".into(), optional(value.content_type()));
        map.insert(
            "extensions".into(),
            value
                .extensions()
                .map(|ext| Value::Object(ext.clone()))
                .unwrap_or(Value::Null),
        );
        map.insert("data".into(), value.data().cloned().unwrap_or(Value::Null));
        Ok(map)
    }
}

fn unset_required<E: Event + ?Sized>(value: &E) -> Vec<&'static str> {
    [
        ("eventType", value.event_type()),
        ("cloudEventsVersion", value.cloud_events_version()),
        ("source", value.source()),
        ("eventId", value.event_id()),
    ]
    .into_iter()
    .filter(|(_, v)| v.is_empty())
    .map(|(name, _)| name)
    .collect()
}

fn optional(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// Builds a [`Payload`] from a decoded JSON field map
///
/// Unknown fields are rejected, never ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadDenormalizer;

impl Denormalizer for PayloadDenormalizer {
    type Output = Payload;

    fn kind(&self) -> MessageKind {
        MessageKind::Payload
    }

    fn supports_denormalization(&self, data: &Value, kind: MessageKind, format: Format) -> bool {
        if format != Format::Json || kind != MessageKind::Payload {
            return false;
        }
        match data {
            Value::Object(map) => {
                PAYLOAD.missing_fields(map).is_empty() && PAYLOAD.extra_fields(map).is_empty()
            }
            _ => false,
        }
    }

    fn denormalize(&self, mut data: FieldMap, kind: MessageKind, format: Format) -> Result<Payload> {
        if format != Format::Json {
            return Err(EventError::UnsupportedFormat(format.to_string()));
        }
        if kind != MessageKind::Payload {
            return Err(EventError::UnsupportedType {
                type_name: kind.to_string(),
                format: format.to_string(),
            });
        }

        let extra = PAYLOAD.extra_fields(&data);
        if !extra.is_empty() {
            return Err(EventError::ExtraFields { fields: extra });
        }
        let missing = PAYLOAD.missing_fields(&data);
        if !missing.is_empty() {
            return Err(EventError::MissingFields { fields: missing });
        }

        Ok(Payload {
            event_type: required_string(&mut data, "eventType")?,
            event_type_version: optional_string(&mut data, "eventTypeVersion")?,
            cloud_events_version: required_string(&mut data, "cloudEventsVersion")?,
            source: required_string(&mut data, "source")?,
            event_id: required_string(&mut data, "eventId")?,
            event_time: event_time(&mut data)?,
            schema_url: optional_string(&mut data, "schemaURL")?,
            content_type: optional_string(&mut data, "contentType")?,
            extensions: match data.shift_remove("extensions") {
                None | Some(Value::Null) => None,
                Some(Value::Object(ext)) => Some(ext),
                Some(_) => return Err(shape_error("extensions", "expected an object")),
            },
            data: data.shift_remove("data").filter(|d| !d.is_null()),
        })
    }
}

fn required_string(data: &mut FieldMap, field: &str) -> Result<String> {
    match data.shift_remove(field) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(shape_error(field, "expected a string")),
    }
}

fn optional_string(data: &mut FieldMap, field: &str) -> Result<Option<String>> {
    match data.shift_remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(shape_error(field, "expected a string or null")),
    }
}

fn event_time(data: &mut FieldMap) -> Result<Option<DateTime<Utc>>> {
    optional_string(data, "eventTime")?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| shape_error("eventTime", &format!("invalid RFC3339 '{}': {}", raw, e)))
        })
        .transpose()
}

fn shape_error(field: &str, reason: &str) -> EventError {
    EventError::Denormalization {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
