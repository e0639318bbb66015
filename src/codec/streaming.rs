//! NATS-Streaming line records
//!
//! A streaming subscription hands over one `key: value` line per field:
//!
//! ```text
//! sequence: 17
//! subject: "some.channel"
//! data: "{\"eventType\":\"some.event\", ...}"
//! timestamp: 1532525124250055719
//! ```
//!
//! `data` is the JSON envelope, quoted, with backslashes, double quotes,
//! and line breaks backslash-escaped so the record stays one line per
//! field.

use super::{Decoder, Denormalizer, Encoder, FieldMap, Normalizer};
use crate::error::{EventError, Result};
use crate::schema::MESSAGE;
use crate::types::{Format, Message, MessageKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*):\s?(.*)$").expect("line record pattern")
});

/// Extracts `(key, value)` pairs from a line record
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDecoder;

impl MessageDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MessageDecoder {
    fn supports_decoding(&self, format: Format) -> bool {
        format == Format::Streaming
    }

    fn decode(&self, data: &str, format: Format) -> Result<FieldMap> {
        if !self.supports_decoding(format) {
            return Err(EventError::UnsupportedFormat(format.to_string()));
        }

        let mut fields = FieldMap::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let caps = LINE
                .captures(line)
                .ok_or_else(|| EventError::MalformedRecord(line.to_string()))?;
            let key = &caps[1];
            let raw = caps[2].trim();

            if !MESSAGE.has_field(key) {
                return Err(EventError::UnknownField(key.to_string()));
            }
            fields.insert(key.to_string(), field_value(key, raw));
        }

        Ok(MESSAGE.pad(fields))
    }
}

/// Per-field post-processing of a raw record value
///
/// Unparseable integers stay textual so the denormalizer can reject them.
fn field_value(key: &str, raw: &str) -> Value {
    match key {
        "sequence" => raw
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        "timestamp" => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        "data" => Value::String(unescape_data(unquote(raw))),
        _ => Value::String(unquote(raw).to_string()),
    }
}

fn escape_data(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse of `escape_data`; unknown escapes are kept verbatim
fn unescape_data(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn unquote(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Renders a message field map as a line record
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageEncoder;

impl Encoder for MessageEncoder {
    fn supports_encoding(&self, format: Format) -> bool {
        format == Format::Streaming
    }

    fn encode(&self, data: &FieldMap, format: Format) -> Result<String> {
        if !self.supports_encoding(format) {
            return Err(EventError::UnsupportedFormat(format.to_string()));
        }

        let mut out = String::new();
        for (key, value) in data {
            let rendered = match (key.as_str(), value) {
                (_, Value::Null) => continue,
                ("data", Value::String(s)) => format!("\"{}\"", escape_data(s)),
                (_, Value::String(s)) => format!("\"{}\"", s),
                (_, other) => other.to_string(),
            };
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&rendered);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Turns a [`Message`] into its four-field map
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageNormalizer;

impl Normalizer<Message> for MessageNormalizer {
    fn supports_normalization(&self, value: &Message) -> bool {
        !value.subject.is_empty()
    }

    fn normalize(&self, value: &Message) -> Result<FieldMap> {
        if !self.supports_normalization(value) {
            return Err(EventError::UnsupportedValue(
                "message subject is empty".to_string(),
            ));
        }

        let mut map = FieldMap::with_capacity(MESSAGE.fields().len());
        map.insert("sequence".into(), value.sequence.into());
        map.insert("subject".into(), value.subject.clone().into());
        map.insert("data".into(), value.data.clone().into());
        map.insert("timestamp".into(), value.timestamp.into());
        Ok(map)
    }
}

/// Builds a [`Message`] from a decoded line record
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDenormalizer;

impl Denormalizer for MessageDenormalizer {
    type Output = Message;

    fn kind(&self) -> MessageKind {
        MessageKind::Message
    }

    fn supports_denormalization(&self, data: &Value, kind: MessageKind, format: Format) -> bool {
        if format != Format::Streaming || kind != MessageKind::Message {
            return false;
        }
        match data {
            Value::Object(map) => {
                map.len() == MESSAGE.fields().len()
                    && map.get("sequence").and_then(Value::as_u64).is_some()
                    && map.get("timestamp").and_then(Value::as_i64).is_some()
                    && map.get("subject").map_or(false, Value::is_string)
                    && map.get("data").map_or(false, Value::is_string)
            }
            _ => false,
        }
    }

    fn denormalize(&self, data: FieldMap, kind: MessageKind, format: Format) -> Result<Message> {
        if format != Format::Streaming {
            return Err(EventError::UnsupportedFormat(format.to_string()));
        }
        if kind != MessageKind::Message {
            return Err(EventError::UnsupportedType {
                type_name: kind.to_string(),
                format: format.to_string(),
            });
        }

        let extra = MESSAGE.extra_fields(&data);
        if !extra.is_empty() {
            return Err(EventError::ExtraFields { fields: extra });
        }
        let missing = MESSAGE.missing_fields(&data);
        if !missing.is_empty() {
            return Err(EventError::MissingFields { fields: missing });
        }

        let sequence = data["sequence"]
            .as_u64()
            .ok_or_else(|| shape_error("sequence", "expected an unsigned integer"))?;
        let timestamp = data["timestamp"]
            .as_i64()
            .ok_or_else(|| shape_error("timestamp", "expected an integer"))?;
        let subject = data["subject"]
            .as_str()
            .ok_or_else(|| shape_error("subject", "expected a string"))?;
        let body = data["data"]
            .as_str()
            .ok_or_else(|| shape_error("data", "expected a string"))?;

        Ok(Message::new(sequence, subject, body, timestamp))
    }
}

fn shape_error(field: &str, reason: &str) -> EventError {
    EventError::Denormalization {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RECORD: &str = "sequence: 17\nsubject: \"some.channel\"\ndata: \"{\\\"eventType\\\":\\\"some.event\\\",\\\"eventId\\\":\\\"1\\\"}\"\ntimestamp: 1532525124250055719";

    fn decoder() -> MessageDecoder {
        MessageDecoder::new()
    }

    #[test]
    fn test_decode_line_record() {
        let fields = decoder().decode(RECORD, Format::Streaming).unwrap();

        assert_eq!(fields["sequence"], 17);
        assert_eq!(fields["subject"], "some.channel");
        assert_eq!(fields["data"], r#"{"eventType":"some.event","eventId":"1"}"#);
        assert_eq!(fields["timestamp"], 1_532_525_124_250_055_719_i64);
        let keys: Vec<_> = fields.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["sequence", "subject", "data", "timestamp"]);
    }

    #[test]
    fn test_decode_crlf_and_blank_lines() {
        let record = "sequence: 1\r\n\r\nsubject: \"a\"\r\ndata: \"{}\"\r\ntimestamp: 2\r\n";
        let fields = decoder().decode(record, Format::Streaming).unwrap();
        assert_eq!(fields["subject"], "a");
        assert_eq!(fields["timestamp"], 2);
    }

    #[test]
    fn test_decode_pads_absent_keys() {
        let fields = decoder().decode("sequence: 5", Format::Streaming).unwrap();
        assert_eq!(fields.len(), 4);
        assert!(fields["subject"].is_null());
        assert!(fields["data"].is_null());
    }

    #[test]
    fn test_decode_unknown_key() {
        let err = decoder()
            .decode("sequence: 1\nredelivered: true", Format::Streaming)
            .unwrap_err();
        assert!(matches!(err, EventError::UnknownField(ref k) if k == "redelivered"));
    }

    #[test]
    fn test_decode_malformed_line() {
        let err = decoder()
            .decode("sequence: 1\n!!!", Format::Streaming)
            .unwrap_err();
        assert!(matches!(err, EventError::MalformedRecord(ref l) if l == "!!!"));
    }

    #[test]
    fn test_decode_wrong_format() {
        let err = decoder().decode(RECORD, Format::Json).unwrap_err();
        assert!(matches!(err, EventError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_denormalize_record() {
        let fields = decoder().decode(RECORD, Format::Streaming).unwrap();
        let message = MessageDenormalizer
            .denormalize(fields, MessageKind::Message, Format::Streaming)
            .unwrap();

        assert_eq!(message.sequence(), 17);
        assert_eq!(message.subject(), "some.channel");
        assert_eq!(message.timestamp(), 1_532_525_124_250_055_719);
        assert!(message.data().starts_with(r#"{"eventType""#));
    }

    #[test]
    fn test_denormalize_missing_key() {
        let fields = decoder()
            .decode("sequence: 1\nsubject: \"a\"", Format::Streaming)
            .unwrap();
        let err = MessageDenormalizer
            .denormalize(fields, MessageKind::Message, Format::Streaming)
            .unwrap_err();
        match err {
            EventError::MissingFields { fields } => assert_eq!(fields, vec!["data", "timestamp"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_denormalize_bad_integer() {
        let fields = decoder()
            .decode(
                "sequence: seventeen\nsubject: \"a\"\ndata: \"{}\"\ntimestamp: 1",
                Format::Streaming,
            )
            .unwrap();
        assert!(!MessageDenormalizer.supports_denormalization(
            &Value::Object(fields.clone()),
            MessageKind::Message,
            Format::Streaming
        ));
        let err = MessageDenormalizer
            .denormalize(fields, MessageKind::Message, Format::Streaming)
            .unwrap_err();
        assert!(matches!(err, EventError::Denormalization { ref field, .. } if field == "sequence"));
    }

    #[test]
    fn test_denormalize_extra_field() {
        let mut fields = decoder().decode(RECORD, Format::Streaming).unwrap();
        fields.insert("ack".into(), json!(true));
        let err = MessageDenormalizer
            .denormalize(fields, MessageKind::Message, Format::Streaming)
            .unwrap_err();
        assert!(matches!(err, EventError::ExtraFields { ref fields } if fields == &["ack"]));
    }

    #[test]
    fn test_supports_denormalization() {
        let fields = decoder().decode(RECORD, Format::Streaming).unwrap();
        let value = Value::Object(fields);
        assert!(MessageDenormalizer.supports_denormalization(&value, MessageKind::Message, Format::Streaming));
        assert!(!MessageDenormalizer.supports_denormalization(&value, MessageKind::Payload, Format::Streaming));
        assert!(!MessageDenormalizer.supports_denormalization(&value, MessageKind::Message, Format::Json));
    }

    #[test]
    fn test_encode_then_decode_recovers_message() {
        let inner = r#"{"eventType":"a","data":{"quote":"say \"hi\"","path":"C:\\tmp"}}"#;
        let message = Message::new(9, "orders.placed", inner, 1_700_000_000_000_000_000);

        let map = MessageNormalizer.normalize(&message).unwrap();
        let text = MessageEncoder.encode(&map, Format::Streaming).unwrap();
        assert!(text.starts_with("sequence: 9\nsubject: \"orders.placed\"\ndata: \"{\\\"eventType"));

        let fields = decoder().decode(&text, Format::Streaming).unwrap();
        let back = MessageDenormalizer
            .denormalize(fields, MessageKind::Message, Format::Streaming)
            .unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_encode_then_decode_multiline_body() {
        let inner = "{\n  \"eventType\": \"x\",\r\n  \"note\": \"tab\\there\"\n}";
        let message = Message::new(1, "a.b", inner, 5);

        let map = MessageNormalizer.normalize(&message).unwrap();
        let text = MessageEncoder.encode(&map, Format::Streaming).unwrap();
        assert_eq!(text.lines().count(), 4);

        let fields = decoder().decode(&text, Format::Streaming).unwrap();
        let back = MessageDenormalizer
            .denormalize(fields, MessageKind::Message, Format::Streaming)
            .unwrap();
        assert_eq!(back.data(), inner);
        assert_eq!(back, message);
    }

    #[test]
    fn test_unescape_keeps_unknown_escapes() {
        assert_eq!(unescape_data(r"a\tb\"), r"a\tb\");
        assert_eq!(unescape_data(r"\q"), r"\q");
        assert_eq!(unescape_data("end\\"), "end\\");
    }

    #[test]
    fn test_normalize_rejects_empty_subject() {
        let err = MessageNormalizer
            .normalize(&Message::new(1, "", "{}", 1))
            .unwrap_err();
        assert!(matches!(err, EventError::UnsupportedValue(_)));
    }
}
