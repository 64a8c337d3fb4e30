use mdt_telemetry::domain::{MdtError, MdtResult, TlsContextProvider, TlsMaterial};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// Loads PEM encoded certificates and keys from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct PemFileTlsProvider;

fn read_pem(path: &str) -> MdtResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| MdtError::Tls(format!("failed to read {}: {}", path, e)))
}

fn read_identity(cert: &str, key: &str) -> MdtResult<Identity> {
    Ok(Identity::from_pem(read_pem(cert)?, read_pem(key)?))
}

impl TlsContextProvider for PemFileTlsProvider {
    fn server_config(&self, material: &TlsMaterial) -> MdtResult<ServerTlsConfig> {
        let (Some(cert), Some(key)) = (&material.cert, &material.key) else {
            return Err(MdtError::Tls(
                "tls_cert and tls_key are required for a TLS listener".to_string(),
            ));
        };

        let mut config = ServerTlsConfig::new().identity(read_identity(cert, key)?);

        if !material.allowed_client_cas.is_empty() {
            let mut bundle = Vec::new();
            for path in &material.allowed_client_cas {
                bundle.extend(read_pem(path)?);
                bundle.push(b'\n');
            }
            config = config.client_ca_root(Certificate::from_pem(bundle));
        }

        Ok(config)
    }

    fn client_config(&self, material: &TlsMaterial) -> MdtResult<ClientTlsConfig> {
        // Without a configured CA the device is verified against the system roots
        let mut config = match &material.ca {
            Some(ca) => ClientTlsConfig::new().ca_certificate(Certificate::from_pem(read_pem(ca)?)),
            None => ClientTlsConfig::new().with_native_roots(),
        };

        match (&material.cert, &material.key) {
            (Some(cert), Some(key)) => {
                config = config.identity(read_identity(cert, key)?);
            }
            (None, None) => {}
            _ => {
                return Err(MdtError::Tls(
                    "tls_cert and tls_key must be set together".to_string(),
                ))
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &str) -> String {
        let path: PathBuf =
            std::env::temp_dir().join(format!("mdt-collector-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_server_requires_cert_and_key() {
        let material = TlsMaterial {
            cert: Some("/etc/mdt/cert.pem".to_string()),
            ..Default::default()
        };
        match PemFileTlsProvider.server_config(&material) {
            Err(MdtError::Tls(msg)) => assert!(msg.contains("tls_key")),
            _ => panic!("expected Tls error"),
        }
    }

    #[test]
    fn test_missing_file_is_reported_with_path() {
        let material = TlsMaterial {
            cert: Some("/nonexistent/mdt/cert.pem".to_string()),
            key: Some("/nonexistent/mdt/key.pem".to_string()),
            ..Default::default()
        };
        match PemFileTlsProvider.server_config(&material) {
            Err(MdtError::Tls(msg)) => assert!(msg.contains("/nonexistent/mdt/cert.pem")),
            _ => panic!("expected Tls error"),
        }
    }

    #[test]
    fn test_server_config_reads_client_cas() {
        let cert = write_temp("server-cert.pem", "cert");
        let key = write_temp("server-key.pem", "key");
        let material = TlsMaterial {
            cert: Some(cert),
            key: Some(key),
            allowed_client_cas: vec!["/nonexistent/mdt/ca.pem".to_string()],
            ..Default::default()
        };
        match PemFileTlsProvider.server_config(&material) {
            Err(MdtError::Tls(msg)) => assert!(msg.contains("/nonexistent/mdt/ca.pem")),
            _ => panic!("expected Tls error"),
        }
    }

    #[test]
    fn test_client_without_ca_uses_system_roots() {
        assert!(PemFileTlsProvider.client_config(&TlsMaterial::default()).is_ok());
    }

    #[test]
    fn test_client_without_ca_still_checks_identity() {
        let material = TlsMaterial {
            key: Some("/etc/mdt/key.pem".to_string()),
            ..Default::default()
        };
        match PemFileTlsProvider.client_config(&material) {
            Err(MdtError::Tls(msg)) => assert!(msg.contains("together")),
            _ => panic!("expected Tls error"),
        }
    }

    #[test]
    fn test_client_rejects_half_identity() {
        let ca = write_temp("client-ca.pem", "ca");
        let material = TlsMaterial {
            ca: Some(ca),
            cert: Some("/etc/mdt/cert.pem".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            PemFileTlsProvider.client_config(&material),
            Err(MdtError::Tls(_))
        ));
    }

    #[test]
    fn test_client_config_with_ca_only() {
        let ca = write_temp("ca-only.pem", "ca");
        let material = TlsMaterial {
            ca: Some(ca),
            ..Default::default()
        };
        assert!(PemFileTlsProvider.client_config(&material).is_ok());
    }
}
