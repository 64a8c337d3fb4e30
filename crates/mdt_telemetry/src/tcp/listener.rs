use std::io;
use tokio::net::TcpListener;
use tracing::debug;

use crate::domain::{MdtError, MdtResult};

/// Host part used for a bare `:port` listen address.
pub const ALL_INTERFACES: &str = "[::]";

const ALL_IPV4_INTERFACES: &str = "0.0.0.0";

/// Bind a listening socket for the dialout transports.
///
/// `[::]:port` accepts IPv4 and IPv6 on dual-stack hosts. Where IPv6 is
/// unavailable it falls back to `0.0.0.0:port`.
pub async fn bind_listener(address: &str) -> MdtResult<TcpListener> {
    let error = match TcpListener::bind(address).await {
        Ok(listener) => return Ok(listener),
        Err(e) => e,
    };

    match address.strip_prefix(ALL_INTERFACES) {
        Some(port) if error.kind() != io::ErrorKind::AddrInUse => {
            let fallback = format!("{}{}", ALL_IPV4_INTERFACES, port);
            debug!(error = %error, address = %fallback, "IPv6 listen failed, using IPv4 only");
            TcpListener::bind(&fallback)
                .await
                .map_err(|source| MdtError::Listen {
                    address: fallback,
                    source,
                })
        }
        _ => Err(MdtError::Listen {
            address: address.to_string(),
            source: error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_all_interfaces_accepts_ipv4_clients() {
        let listener = bind_listener("[::]:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_ne!(port, 0);

        let client = TcpStream::connect(("127.0.0.1", port)).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_address_in_use_is_not_retried() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = occupied.local_addr().unwrap().to_string();

        match bind_listener(&address).await {
            Err(MdtError::Listen { address: reported, .. }) => assert_eq!(reported, address),
            other => panic!("expected Listen, got {:?}", other.map(|_| ())),
        }
    }
}
