use config::{Config, ConfigError, Environment};
use mdt_telemetry::domain::MdtConfig;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// tcp-dialout, grpc-dialout or grpc-dialin
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Listen address for dialout, device address for dialin
    #[serde(default = "default_service_address")]
    pub service_address: String,

    // gRPC dialin
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub subscription: String,

    /// Redial interval in milliseconds, zero or negative disables redial
    #[serde(default = "default_redial_ms")]
    pub redial_ms: i64,

    /// Maximum message size in bytes, zero keeps the transport default
    #[serde(default)]
    pub max_msg_size: usize,

    // TLS
    #[serde(default)]
    pub enable_tls: bool,

    #[serde(default)]
    pub tls_ca: Option<String>,

    #[serde(default)]
    pub tls_cert: Option<String>,

    #[serde(default)]
    pub tls_key: Option<String>,

    /// Comma-separated client CA files accepted by the dialout listener
    #[serde(default)]
    pub tls_allowed_cacerts: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_transport() -> String {
    "grpc-dialout".to_string()
}

fn default_service_address() -> String {
    ":57000".to_string()
}

fn default_redial_ms() -> i64 {
    10_000
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("log_level", &self.log_level)
            .field("transport", &self.transport)
            .field("service_address", &self.service_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("subscription", &self.subscription)
            .field("redial_ms", &self.redial_ms)
            .field("max_msg_size", &self.max_msg_size)
            .field("enable_tls", &self.enable_tls)
            .field("tls_ca", &self.tls_ca)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("tls_allowed_cacerts", &self.tls_allowed_cacerts)
            .finish()
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("MDT"))
            .build()?
            .try_deserialize()
    }

    /// Parse the comma-separated client CA list.
    pub fn allowed_cacerts(&self) -> Vec<String> {
        self.tls_allowed_cacerts
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn to_mdt_config(&self) -> MdtConfig {
        MdtConfig {
            transport: self.transport.clone(),
            service_address: self.service_address.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            subscription: self.subscription.clone(),
            redial_ms: self.redial_ms,
            max_msg_size: self.max_msg_size,
            enable_tls: self.enable_tls,
            tls_ca: self.tls_ca.clone(),
            tls_cert: self.tls_cert.clone(),
            tls_key: self.tls_key.clone(),
            tls_allowed_cacerts: self.allowed_cacerts(),
        }
    }
}
