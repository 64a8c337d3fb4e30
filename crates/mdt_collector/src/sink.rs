use mdt_telemetry::domain::{Accumulator, FieldValue, MdtError, Measurement};
use std::io::Write;
use std::sync::Mutex;
use tracing::{error, warn};

/// Writes measurements as InfluxDB line protocol, one line per measurement.
///
/// Tags with empty values and non-finite floats are dropped since line
/// protocol cannot carry them.
pub struct LineProtocolAccumulator<W: Write + Send> {
    writer: Mutex<W>,
}

impl LineProtocolAccumulator<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LineProtocolAccumulator<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> Accumulator for LineProtocolAccumulator<W> {
    fn add_measurement(&self, measurement: Measurement) {
        let Some(line) = to_line_protocol(&measurement) else {
            warn!(path = %measurement.path, "measurement has no representable fields");
            return;
        };

        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            error!(error = %e, "failed to write measurement");
        }
    }

    fn add_error(&self, error: MdtError) {
        error!(error = %error, "Cisco MDT telemetry error");
    }
}

/// Render `measurement` as one line, or `None` when no field survives.
pub fn to_line_protocol(measurement: &Measurement) -> Option<String> {
    let fields: Vec<String> = measurement
        .fields
        .iter()
        .filter_map(|(key, value)| {
            format_field_value(value).map(|v| format!("{}={}", escape_key(key), v))
        })
        .collect();

    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(&measurement.path);
    for (key, value) in &measurement.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    line.push_str(&fields.join(","));

    let nanos = measurement
        .timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| measurement.timestamp.timestamp_millis() * 1_000_000);
    line.push(' ');
    line.push_str(&nanos.to_string());

    Some(line)
}

fn format_field_value(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Bytes(_) => Some(quote(&value.to_string())),
        FieldValue::String(v) => Some(quote(v)),
        FieldValue::Bool(v) => Some(v.to_string()),
        FieldValue::Uint32(v) => Some(format!("{}u", v)),
        FieldValue::Uint64(v) => Some(format!("{}u", v)),
        FieldValue::Sint32(v) => Some(format!("{}i", v)),
        FieldValue::Sint64(v) => Some(format!("{}i", v)),
        FieldValue::Double(v) => v.is_finite().then(|| v.to_string()),
        FieldValue::Float(v) => v.is_finite().then(|| v.to_string()),
    }
}

fn escape_measurement(name: &str) -> String {
    escape(name, &[',', ' '])
}

fn escape_key(key: &str) -> String {
    escape(key, &[',', '=', ' '])
}

fn quote(value: &str) -> String {
    format!("\"{}\"", escape(value, &['"', '\\']))
}

fn escape(input: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
