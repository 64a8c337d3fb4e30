#![allow(dead_code)]

use mdt_telemetry::domain::{
    Accumulator, MdtError, MdtResult, Measurement, TlsContextProvider, TlsMaterial,
};
use mdt_telemetry::proto::telemetry::telemetry::{NodeId, Subscription};
use mdt_telemetry::proto::telemetry::telemetry_field::ValueByType;
use mdt_telemetry::proto::telemetry::{Telemetry, TelemetryField};
use prost::Message;
use std::sync::Mutex;
use std::time::Duration;
use tonic::transport::{ClientTlsConfig, ServerTlsConfig};

/// Accumulator that keeps everything it is handed.
#[derive(Default)]
pub struct CollectingAccumulator {
    measurements: Mutex<Vec<Measurement>>,
    errors: Mutex<Vec<MdtError>>,
}

impl CollectingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        self.measurements.lock().unwrap().clone()
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.lock().unwrap().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn count_errors(&self, predicate: impl Fn(&MdtError) -> bool) -> usize {
        self.errors.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    /// Poll until `condition` holds or `timeout` elapses.
    pub async fn wait_until(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition(self)
    }
}

impl Accumulator for CollectingAccumulator {
    fn add_measurement(&self, measurement: Measurement) {
        self.measurements.lock().unwrap().push(measurement);
    }

    fn add_error(&self, error: MdtError) {
        self.errors.lock().unwrap().push(error);
    }
}

/// Provider for tests that never enable TLS.
pub struct NoTls;

impl TlsContextProvider for NoTls {
    fn server_config(&self, _material: &TlsMaterial) -> MdtResult<ServerTlsConfig> {
        Err(MdtError::Tls("TLS not available in tests".to_string()))
    }

    fn client_config(&self, _material: &TlsMaterial) -> MdtResult<ClientTlsConfig> {
        Err(MdtError::Tls("TLS not available in tests".to_string()))
    }
}

pub fn leaf(name: &str, value: ValueByType) -> TelemetryField {
    TelemetryField {
        name: name.to_string(),
        value_by_type: Some(value),
        ..Default::default()
    }
}

pub fn group(name: &str, fields: Vec<TelemetryField>) -> TelemetryField {
    TelemetryField {
        name: name.to_string(),
        fields,
        ..Default::default()
    }
}

/// One row with the given keys and content.
pub fn row(timestamp: u64, keys: Vec<TelemetryField>, content: Vec<TelemetryField>) -> TelemetryField {
    TelemetryField {
        timestamp,
        fields: vec![group("keys", keys), group("content", content)],
        ..Default::default()
    }
}

pub fn envelope(path: &str, msg_timestamp: u64, rows: Vec<TelemetryField>) -> Vec<u8> {
    Telemetry {
        node_id: Some(NodeId::NodeIdStr("router1".to_string())),
        subscription: Some(Subscription::SubscriptionIdStr("sub1".to_string())),
        encoding_path: path.to_string(),
        msg_timestamp,
        data_gpbkv: rows,
        ..Default::default()
    }
    .encode_to_vec()
}

/// `ifstats` envelope with one interface row.
pub fn ifstats(if_name: &str, bytes_in: u64) -> Vec<u8> {
    envelope(
        "ifstats",
        1000,
        vec![row(
            0,
            vec![leaf("ifName", ValueByType::StringValue(if_name.to_string()))],
            vec![leaf("bytesIn", ValueByType::Uint64Value(bytes_in))],
        )],
    )
}
