//! Field schemas — which named fields a wire structure supports
//!
//! Each structure kind (payload/event envelope, NATS-Streaming message
//! record) has one constant table of `(name, required)` pairs. Codecs and
//! the builder validate candidate field maps against these tables in both
//! directions.

use serde_json::{Map, Value};

/// One field declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Wire name of the field
    pub name: &'static str,

    /// Whether a valid instance must carry a non-null value
    pub required: bool,
}

impl FieldDef {
    const fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
        }
    }

    const fn optional(name: &'static str) -> Self {
        Self {
            name,
            required: false,
        }
    }
}

/// Ordered, immutable field table for one structure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    fields: &'static [FieldDef],
}

/// CloudEvents envelope fields, in canonical wire order
pub const PAYLOAD: FieldSchema = FieldSchema::new(&[
    FieldDef::required("eventType"),
    FieldDef::optional("eventTypeVersion"),
    FieldDef::required("cloudEventsVersion"),
    FieldDef::required("source"),
    FieldDef::required("eventId"),
    FieldDef::optional("eventTime"),
    FieldDef::optional("schemaURL"),
    FieldDef::optional("contentType"),
    FieldDef::optional("extensions"),
    FieldDef::optional("data"),
]);

/// Events share the envelope layout
pub const EVENT: FieldSchema = PAYLOAD;

/// NATS-Streaming subscription record fields
pub const MESSAGE: FieldSchema = FieldSchema::new(&[
    FieldDef::required("sequence"),
    FieldDef::required("subject"),
    FieldDef::required("data"),
    FieldDef::required("timestamp"),
]);

impl FieldSchema {
    /// Build a schema from a fixed declaration list
    pub const fn new(fields: &'static [FieldDef]) -> Self {
        Self { fields }
    }

    /// All declarations in order
    pub fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    /// Every supported field name, in declaration order
    pub fn supported_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|f| f.name)
    }

    /// Required field names, in declaration order
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    /// Whether `name` is declared and required
    pub fn is_field_required(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.required && f.name == name)
    }

    /// Whether `name` is declared at all
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Required fields that are absent or null in `data`, in schema order
    pub fn missing_fields(&self, data: &Map<String, Value>) -> Vec<String> {
        self.required_fields()
            .filter(|name| data.get(*name).map_or(true, Value::is_null))
            .map(str::to_string)
            .collect()
    }

    /// Keys of `data` that this schema does not declare, in input order
    pub fn extra_fields(&self, data: &Map<String, Value>) -> Vec<String> {
        data.keys()
            .filter(|key| !self.has_field(key))
            .cloned()
            .collect()
    }

    /// Insert an explicit null for every declared field absent from `data`
    ///
    /// The result lists declared fields in schema order, followed by any
    /// undeclared keys the input carried.
    pub fn pad(&self, mut data: Map<String, Value>) -> Map<String, Value> {
        let mut padded = Map::with_capacity(self.fields.len().max(data.len()));
        for name in self.supported_fields() {
            let value = data.shift_remove(name).unwrap_or(Value::Null);
            padded.insert(name.to_string(), value);
        }
        padded.extend(data);
        padded
    }
}
