use tonic::transport::{ClientTlsConfig, ServerTlsConfig};

use crate::domain::MdtResult;

/// Certificate material paths, as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    /// Client CAs accepted by a TLS server; non-empty turns on client authentication.
    pub allowed_client_cas: Vec<String>,
}

/// Builds ready-to-use TLS contexts from certificate material.
///
/// Loading the material is left to the implementation; a failure is fatal to
/// startup and surfaces as [`crate::domain::MdtError::Tls`].
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait TlsContextProvider: Send + Sync {
    /// Context for the gRPC dialout listener.
    fn server_config(&self, material: &TlsMaterial) -> MdtResult<ServerTlsConfig>;

    /// Context for the gRPC dialin connection.
    fn client_config(&self, material: &TlsMaterial) -> MdtResult<ClientTlsConfig>;
}
