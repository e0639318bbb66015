//! Composed serializer — decoder + denormalizer pipelines behind one facade

use super::{
    Decoder, Denormalizer, Encoder, JsonDecoder, JsonEncoder, MessageDecoder, MessageDenormalizer,
    MessageEncoder, MessageNormalizer, Normalizer, PayloadDenormalizer, PayloadNormalizer,
};
use crate::error::{EventError, Result};
use crate::types::{Event, Format, Message, MessageKind, Payload};

/// One decoder paired with one denormalizer
#[derive(Debug, Clone)]
pub struct Deserializer<D, N> {
    decoder: D,
    denormalizer: N,
}

impl<D: Decoder, N: Denormalizer> Deserializer<D, N> {
    pub fn new(decoder: D, denormalizer: N) -> Self {
        Self {
            decoder,
            denormalizer,
        }
    }

    /// Decode `data` and build the requested kind
    ///
    /// Fails with `UnsupportedFormat` before decoding and with
    /// `UnsupportedType` before denormalizing; structural problems surface
    /// from the denormalizer itself.
    pub fn deserialize(&self, data: &str, kind: MessageKind, format: Format) -> Result<N::Output> {
        if !self.decoder.supports_decoding(format) {
            return Err(EventError::UnsupportedFormat(format.to_string()));
        }

        let fields = self.decoder.decode(data, format)?;

        if self.denormalizer.kind() != kind {
            return Err(EventError::UnsupportedType {
                type_name: kind.to_string(),
                format: format.to_string(),
            });
        }

        self.denormalizer.denormalize(fields, kind, format)
    }
}

/// Result of a tagged deserialization
#[derive(Debug, Clone, PartialEq)]
pub enum Deserialized {
    Payload(Payload),
    Message(Message),
}

impl Deserialized {
    pub fn kind(&self) -> MessageKind {
        match self {
            Deserialized::Payload(_) => MessageKind::Payload,
            Deserialized::Message(_) => MessageKind::Message,
        }
    }

    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Deserialized::Payload(p) => Some(p),
            Deserialized::Message(_) => None,
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Deserialized::Message(m) => Some(m),
            Deserialized::Payload(_) => None,
        }
    }
}

/// Serialization facade used by the connection adapter
#[derive(Debug, Clone)]
pub struct Serializer {
    envelope: Deserializer<JsonDecoder, PayloadDenormalizer>,
    record: Deserializer<MessageDecoder, MessageDenormalizer>,
    envelope_normalizer: PayloadNormalizer,
    envelope_encoder: JsonEncoder,
    record_normalizer: MessageNormalizer,
    record_encoder: MessageEncoder,
}

impl Serializer {
    pub fn new() -> Self {
        Self {
            envelope: Deserializer::new(JsonDecoder::default(), PayloadDenormalizer),
            record: Deserializer::new(MessageDecoder::new(), MessageDenormalizer),
            envelope_normalizer: PayloadNormalizer,
            envelope_encoder: JsonEncoder,
            record_normalizer: MessageNormalizer,
            record_encoder: MessageEncoder,
        }
    }

    /// Encode an event as JSON envelope text
    pub fn serialize<E: Event + ?Sized>(&self, event: &E) -> Result<String> {
        let fields = self.envelope_normalizer.normalize(event)?;
        self.envelope_encoder.encode(&fields, Format::Json)
    }

    /// Encode a streaming message as a line record
    pub fn serialize_message(&self, message: &Message) -> Result<String> {
        let fields = self.record_normalizer.normalize(message)?;
        self.record_encoder.encode(&fields, Format::Streaming)
    }

    /// Deserialize into the requested kind
    ///
    /// Each kind has exactly one wire format: payloads are JSON, messages
    /// are line records.
    pub fn deserialize(&self, data: &str, kind: MessageKind, format: Format) -> Result<Deserialized> {
        match kind {
            MessageKind::Payload => self
                .envelope
                .deserialize(data, kind, format)
                .map(Deserialized::Payload),
            MessageKind::Message => self
                .record
                .deserialize(data, kind, format)
                .map(Deserialized::Message),
        }
    }

    /// Deserialize by type name, validated against the known kinds
    pub fn deserialize_named(&self, data: &str, type_name: &str, format: Format) -> Result<Deserialized> {
        let kind = type_name.parse::<MessageKind>()?;
        self.deserialize(data, kind, format)
    }

    pub fn deserialize_message(&self, data: &str) -> Result<Message> {
        self.record
            .deserialize(data, MessageKind::Message, Format::Streaming)
    }

    /// Deserialize an envelope from either wire format
    ///
    /// For the streaming format the line record is decoded first and the
    /// envelope is read from its `data` field.
    pub fn deserialize_payload(&self, data: &str, format: Format) -> Result<Payload> {
        match format {
            Format::Json => self.envelope.deserialize(data, MessageKind::Payload, format),
            Format::Streaming => {
                let message = self.deserialize_message(data)?;
                self.envelope
                    .deserialize(message.data(), MessageKind::Payload, Format::Json)
            }
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}
