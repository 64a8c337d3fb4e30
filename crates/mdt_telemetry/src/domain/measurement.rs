use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::proto::telemetry::telemetry_field::ValueByType;

/// Scalar carried by a telemetry node.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bytes(Vec<u8>),
    String(String),
    Bool(bool),
    Uint32(u32),
    Uint64(u64),
    Sint32(i32),
    Sint64(i64),
    Double(f64),
    Float(f32),
}

impl From<&ValueByType> for FieldValue {
    fn from(value: &ValueByType) -> Self {
        match value {
            ValueByType::BytesValue(v) => FieldValue::Bytes(v.clone()),
            ValueByType::StringValue(v) => FieldValue::String(v.clone()),
            ValueByType::BoolValue(v) => FieldValue::Bool(*v),
            ValueByType::Uint32Value(v) => FieldValue::Uint32(*v),
            ValueByType::Uint64Value(v) => FieldValue::Uint64(*v),
            ValueByType::Sint32Value(v) => FieldValue::Sint32(*v),
            ValueByType::Sint64Value(v) => FieldValue::Sint64(*v),
            ValueByType::DoubleValue(v) => FieldValue::Double(*v),
            ValueByType::FloatValue(v) => FieldValue::Float(*v),
        }
    }
}

/// Renders the value the way it appears as a tag value.
///
/// Byte strings render as their decimal octets, e.g. `[10 0 0 1]`.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bytes(bytes) => {
                f.write_str("[")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", b)?;
                }
                f.write_str("]")
            }
            FieldValue::String(v) => f.write_str(v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Uint32(v) => write!(f, "{}", v),
            FieldValue::Uint64(v) => write!(f, "{}", v),
            FieldValue::Sint32(v) => write!(f, "{}", v),
            FieldValue::Sint64(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// One flattened metric record ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub path: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

/// Convert a millisecond epoch timestamp to a UTC instant.
///
/// The sub-second remainder becomes nanoseconds (`ms % 1000 * 1_000_000`).
/// Values beyond the representable range clamp to the Unix epoch.
pub fn timestamp_from_millis(millis: u64) -> DateTime<Utc> {
    let secs = (millis / 1000) as i64;
    let nanos = ((millis % 1000) * 1_000_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}
