//! GELF wire records and the builder that assembles them.
//!
//! Every payload shipped by either transport is a flat JSON object in GELF
//! 1.1 shape: a handful of required fields plus custom fields whose names
//! carry a `_` prefix. The builder owns the field-layering rules (ambient
//! context, then per-logger fields, then per-call fields, later phases
//! winning) and guarantees that reserved GELF names can never be clobbered.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Protocol version stamped onto every record.
pub const GELF_VERSION: &str = "1.1";

/// Custom field carrying the lineage's session identifier.
pub const SESSION_FIELD: &str = "_log_session_id";

/// Field names owned by the protocol; custom fields may never take them
/// over (`_id` is rejected by collectors, the rest are the record's own
/// envelope).
const RESERVED_FIELDS: [&str; 7] = [
    "id",
    "timestamp",
    "version",
    "level",
    "host",
    "short_message",
    "full_message",
];

/// Custom fields keyed by their wire name (prefix included).
pub type FieldMap = BTreeMap<String, FieldValue>;

/// The closed set of values a custom field can carry on the wire.
///
/// Structured inputs are not represented directly: they are rendered to
/// their JSON text form at the conversion boundary, so a `FieldValue` is
/// always a JSON primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
}

impl FieldValue {
    /// Renders any structured value to its JSON text form. Serialization
    /// failures degrade to a placeholder naming the offending type; the
    /// conversion itself never fails.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> FieldValue {
        match serde_json::to_string(value) {
            Ok(text) => FieldValue::Text(text),
            Err(_) => FieldValue::Text(format!(
                "<unserializable {}>",
                std::any::type_name::<T>()
            )),
        }
    }

    /// Returns whether this is the JSON `null` value.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Consumes the value, rendering non-text variants as plain text.
    pub fn into_text(self) -> String {
        match self {
            FieldValue::Text(text) => text,
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Float(value) => value.to_string(),
            FieldValue::Boolean(value) => value.to_string(),
            FieldValue::Null => "null".to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<serde_json::Value> for FieldValue {
    /// Primitives map directly; arrays and objects are rendered to their
    /// JSON text form.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(value) => FieldValue::Boolean(value),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(FieldValue::Integer)
                .or_else(|| number.as_f64().map(FieldValue::Float))
                .unwrap_or_else(|| FieldValue::Text(number.to_string())),
            serde_json::Value::String(text) => FieldValue::Text(text),
            structured @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                FieldValue::Text(structured.to_string())
            }
        }
    }
}

/// One GELF record as it travels on the wire.
///
/// Custom fields are flattened next to the envelope fields, so the
/// serialized form is a single flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GelfRecord {
    pub version: String,
    pub host: String,
    pub short_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_message: Option<String>,
    pub timestamp: f64,
    pub level: u8,
    pub facility: String,
    #[serde(flatten)]
    pub fields: FieldMap,
}

/// Assembles records for one logger, with the static field layers
/// (session, ambient context, per-logger fields) resolved once up front.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    host: String,
    facility: String,
    static_fields: FieldMap,
}

impl RecordBuilder {
    /// Resolves the static field layers: the session identifier first,
    /// then ambient context entries (dropping nulls), then per-logger
    /// fields, later layers winning on collision.
    pub fn new(
        host: impl Into<String>,
        facility: impl Into<String>,
        session_id: &str,
        ambient: FieldMap,
        global: FieldMap,
    ) -> Self {
        let mut static_fields = FieldMap::new();
        static_fields.insert(
            SESSION_FIELD.to_string(),
            FieldValue::Text(session_id.to_string()),
        );
        for (name, value) in ambient {
            if value.is_null() || is_reserved(&name) {
                continue;
            }
            static_fields.insert(prefixed(&name), value);
        }
        for (name, value) in global {
            if is_reserved(&name) {
                continue;
            }
            static_fields.insert(prefixed(&name), value);
        }
        Self {
            host: host.into(),
            facility: facility.into(),
            static_fields,
        }
    }

    /// Builds one record. Per-call fields win over the static layers;
    /// reserved names are dropped; a structured long-form payload is
    /// rendered to text. Never fails.
    pub fn build(
        &self,
        severity: Severity,
        short_message: String,
        full_message: Option<FieldValue>,
        custom_fields: FieldMap,
    ) -> GelfRecord {
        let mut fields = self.static_fields.clone();
        for (name, value) in custom_fields {
            if is_reserved(&name) {
                continue;
            }
            fields.insert(prefixed(&name), value);
        }
        GelfRecord {
            version: GELF_VERSION.to_string(),
            host: self.host.clone(),
            short_message,
            full_message: full_message.map(FieldValue::into_text),
            timestamp: now_unix_seconds(),
            level: severity.as_u8(),
            facility: self.facility.clone(),
            fields,
        }
    }
}

/// Current wall-clock time as fractional seconds since the unix epoch.
pub(crate) fn now_unix_seconds() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

fn prefixed(name: &str) -> String {
    if name.starts_with('_') {
        name.to_string()
    } else {
        format!("_{name}")
    }
}

fn is_reserved(name: &str) -> bool {
    let bare = name.strip_prefix('_').unwrap_or(name);
    RESERVED_FIELDS.contains(&bare)
}
