//! GPB key/value decoding.
//!
//! Each top-level row of a [`Telemetry`] envelope carries a `keys` subtree
//! (becomes tags) and a `content` subtree (becomes fields). Nested nodes are
//! flattened depth-first into `/`-joined names:
//!
//! ```text
//! keys                      content
//! └── interface-name=Gi0/0  └── stats
//!                               ├── bytes-in=100
//!                               └── bytes-out=42
//!
//! tags:   Producer, Target, interface-name=Gi0/0
//! fields: stats/bytes-in=100, stats/bytes-out=42
//! ```

use prost::Message;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::domain::{timestamp_from_millis, Accumulator, FieldValue, MdtError, MdtResult, Measurement};
use crate::proto::telemetry::telemetry::{NodeId, Subscription};
use crate::proto::telemetry::{Telemetry, TelemetryField};

const KEYS_FIELD: &str = "keys";
const CONTENT_FIELD: &str = "content";
const PRODUCER_TAG: &str = "Producer";
const TARGET_TAG: &str = "Target";

/// Where scalar values found during flattening end up.
enum Target<'a> {
    Tags(&'a mut BTreeMap<String, String>),
    Fields(&'a mut BTreeMap<String, FieldValue>),
}

/// Decode a raw envelope and flatten it.
///
/// Fails only when the bytes are not a valid envelope. Otherwise returns one
/// entry per top-level row, in order; a row that yields no tags, no fields or
/// has no encoding path is an [`MdtError::EmptyMeasurement`].
pub fn decode_telemetry(data: &[u8]) -> MdtResult<Vec<MdtResult<Measurement>>> {
    let telemetry = Telemetry::decode(data)?;
    Ok(flatten_telemetry(&telemetry))
}

/// Flatten an already decoded envelope. Pure function of its input.
pub fn flatten_telemetry(telemetry: &Telemetry) -> Vec<MdtResult<Measurement>> {
    let mut namebuf = String::new();
    telemetry
        .data_gpbkv
        .iter()
        .map(|row| flatten_row(telemetry, row, &mut namebuf))
        .collect()
}

/// Decode a packet received on any transport and hand the result to the sink.
pub fn handle_telemetry(data: &[u8], accumulator: &dyn Accumulator) {
    let rows = match decode_telemetry(data) {
        Ok(rows) => rows,
        Err(e) => {
            accumulator.add_error(e);
            return;
        }
    };

    debug!(rows = rows.len(), size = data.len(), "decoded telemetry packet");

    for row in rows {
        match row {
            Ok(measurement) => accumulator.add_measurement(measurement),
            Err(e) => accumulator.add_error(e),
        }
    }
}

fn node_id(telemetry: &Telemetry) -> &str {
    match &telemetry.node_id {
        Some(NodeId::NodeIdStr(id)) => id,
        None => "",
    }
}

fn subscription_id(telemetry: &Telemetry) -> &str {
    match &telemetry.subscription {
        Some(Subscription::SubscriptionIdStr(id)) => id,
        None => "",
    }
}

fn flatten_row(
    telemetry: &Telemetry,
    row: &TelemetryField,
    namebuf: &mut String,
) -> MdtResult<Measurement> {
    // Row timestamp wins over the envelope timestamp
    let measured = if row.timestamp != 0 {
        row.timestamp
    } else {
        telemetry.msg_timestamp
    };

    let mut tags = BTreeMap::new();
    let mut fields = BTreeMap::new();

    for group in &row.fields {
        match group.name.as_str() {
            KEYS_FIELD => {
                tags = BTreeMap::new();
                tags.insert(PRODUCER_TAG.to_string(), node_id(telemetry).to_string());
                tags.insert(TARGET_TAG.to_string(), subscription_id(telemetry).to_string());
                for child in &group.fields {
                    flatten_field(child, namebuf, &mut Target::Tags(&mut tags));
                }
            }
            CONTENT_FIELD => {
                fields = BTreeMap::new();
                for child in &group.fields {
                    flatten_field(child, namebuf, &mut Target::Fields(&mut fields));
                }
            }
            other => {
                info!(
                    field = %other,
                    encoding_path = %telemetry.encoding_path,
                    "unexpected top-level MDT field"
                );
            }
        }
    }

    if fields.is_empty() || tags.is_empty() || telemetry.encoding_path.is_empty() {
        return Err(MdtError::EmptyMeasurement);
    }

    Ok(Measurement {
        path: telemetry.encoding_path.clone(),
        tags,
        fields,
        timestamp: timestamp_from_millis(measured),
    })
}

/// Depth-first walk; `namebuf` is restored to its entry length on return.
fn flatten_field(field: &TelemetryField, namebuf: &mut String, target: &mut Target<'_>) {
    let namelen = namebuf.len();
    if namelen > 0 {
        namebuf.push('/');
    }
    namebuf.push_str(&field.name);

    if let Some(value) = &field.value_by_type {
        let value = FieldValue::from(value);
        match target {
            Target::Fields(fields) => {
                fields.insert(namebuf.clone(), value);
            }
            Target::Tags(tags) => {
                tags.insert(namebuf.clone(), value.to_string());
            }
        }
    }

    for child in &field.fields {
        flatten_field(child, namebuf, target);
    }

    namebuf.truncate(namelen);
}
