use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::{MdtError, TlsMaterial};

/// Maximum TCP dialout payload accepted when `max_msg_size` is unset.
pub const DEFAULT_TCP_MAX_MSG_LEN: u32 = 1024 * 1024;

/// Encoding selector sent with every dialin subscription (GPB key/value).
pub const GRPC_ENCODE_GPBKV: i64 = 3;

/// The transport the service runs. Exactly one is active per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    TcpDialout,
    GrpcDialout,
    GrpcDialin,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpDialout => write!(f, "tcp-dialout"),
            Self::GrpcDialout => write!(f, "grpc-dialout"),
            Self::GrpcDialin => write!(f, "grpc-dialin"),
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = MdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp-dialout" => Ok(Self::TcpDialout),
            "grpc-dialout" => Ok(Self::GrpcDialout),
            "grpc-dialin" => Ok(Self::GrpcDialin),
            other => Err(MdtError::InvalidTransport(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdtConfig {
    /// One of `tcp-dialout`, `grpc-dialout`, `grpc-dialin`. Validated on start.
    pub transport: String,

    /// Listen address for dialout, device address for dialin. `:57000` binds all interfaces.
    pub service_address: String,

    // gRPC dialin
    pub username: String,
    pub password: String,
    pub subscription: String,

    /// Delay between dialin re-subscriptions (default: 10 seconds). Zero or negative disables redial.
    pub redial_ms: i64,

    /// Maximum accepted message size in bytes (default: 0, transport default).
    pub max_msg_size: usize,

    // TLS, gRPC transports only
    pub enable_tls: bool,
    pub tls_ca: Option<String>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub tls_allowed_cacerts: Vec<String>,
}

impl Default for MdtConfig {
    fn default() -> Self {
        Self {
            transport: "grpc-dialout".to_string(),
            service_address: ":57000".to_string(),
            username: String::new(),
            password: String::new(),
            subscription: String::new(),
            redial_ms: 10_000,
            max_msg_size: 0,
            enable_tls: false,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            tls_allowed_cacerts: Vec::new(),
        }
    }
}

impl MdtConfig {
    pub fn transport(&self) -> Result<Transport, MdtError> {
        self.transport.parse()
    }

    /// `None` when redial is disabled.
    pub fn redial_interval(&self) -> Option<Duration> {
        if self.redial_ms <= 0 {
            None
        } else {
            Some(Duration::from_millis(self.redial_ms as u64))
        }
    }

    /// Largest `MsgLen` the TCP dialout server accepts.
    pub fn tcp_max_msg_len(&self) -> u32 {
        if self.max_msg_size > 0 {
            u32::try_from(self.max_msg_size).unwrap_or(u32::MAX)
        } else {
            DEFAULT_TCP_MAX_MSG_LEN
        }
    }

    /// gRPC decoding limit, `None` keeps the transport default.
    pub fn grpc_max_msg_size(&self) -> Option<usize> {
        (self.max_msg_size > 0).then_some(self.max_msg_size)
    }

    /// Address to bind for the dialout transports.
    ///
    /// A bare `:port` listens on every interface, IPv4 and IPv6.
    pub fn listen_address(&self) -> String {
        if self.service_address.starts_with(':') {
            format!("[::]{}", self.service_address)
        } else {
            self.service_address.clone()
        }
    }

    /// URI of the device for dialin.
    pub fn dial_uri(&self) -> String {
        if self.service_address.contains("://") {
            return self.service_address.clone();
        }
        let scheme = if self.enable_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.service_address)
    }

    pub fn tls_material(&self) -> TlsMaterial {
        TlsMaterial {
            ca: self.tls_ca.clone(),
            cert: self.tls_cert.clone(),
            key: self.tls_key.clone(),
            allowed_client_cas: self.tls_allowed_cacerts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MdtConfig::default();
        assert_eq!(config.transport().unwrap(), Transport::GrpcDialout);
        assert_eq!(config.listen_address(), "[::]:57000");
        assert_eq!(config.redial_interval(), Some(Duration::from_secs(10)));
        assert_eq!(config.tcp_max_msg_len(), DEFAULT_TCP_MAX_MSG_LEN);
        assert_eq!(config.grpc_max_msg_size(), None);
    }

    #[test]
    fn test_transport_round_trips_through_display() {
        for transport in [
            Transport::TcpDialout,
            Transport::GrpcDialout,
            Transport::GrpcDialin,
        ] {
            assert_eq!(transport.to_string().parse::<Transport>().unwrap(), transport);
        }
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        let config = MdtConfig {
            transport: "udp-dialout".to_string(),
            ..Default::default()
        };
        match config.transport() {
            Err(MdtError::InvalidTransport(name)) => assert_eq!(name, "udp-dialout"),
            other => panic!("expected InvalidTransport, got {:?}", other),
        }
    }

    #[test]
    fn test_redial_disabled_when_not_positive() {
        for redial_ms in [0, -1000] {
            let config = MdtConfig {
                redial_ms,
                ..Default::default()
            };
            assert_eq!(config.redial_interval(), None);
        }
    }

    #[test]
    fn test_max_msg_size_overrides_limits() {
        let config = MdtConfig {
            max_msg_size: 4096,
            ..Default::default()
        };
        assert_eq!(config.tcp_max_msg_len(), 4096);
        assert_eq!(config.grpc_max_msg_size(), Some(4096));
    }

    #[test]
    fn test_dial_uri_scheme_follows_tls() {
        let mut config = MdtConfig {
            service_address: "10.0.0.1:57500".to_string(),
            ..Default::default()
        };
        assert_eq!(config.dial_uri(), "http://10.0.0.1:57500");
        config.enable_tls = true;
        assert_eq!(config.dial_uri(), "https://10.0.0.1:57500");
        config.service_address = "http://router:57500".to_string();
        assert_eq!(config.dial_uri(), "http://router:57500");
    }

    #[test]
    fn test_explicit_listen_address_is_kept() {
        let config = MdtConfig {
            service_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        assert_eq!(config.listen_address(), "127.0.0.1:0");
    }
}
