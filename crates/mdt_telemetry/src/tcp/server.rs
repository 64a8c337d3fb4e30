use bytes::BytesMut;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::domain::{handle_telemetry, Accumulator, MdtError, MdtResult};
use crate::tcp::header::{DialoutHeader, HEADER_SIZE};
use crate::tcp::listener::bind_listener;

struct LiveConnection {
    peer: SocketAddr,
    token: CancellationToken,
}

/// Connections currently served by a [`TcpDialoutServer`].
///
/// Every connection owns a child of the server's shutdown token, so closing
/// a connection here or shutting the server down both end its worker.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<u64, LiveConnection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection and return its id and cancellation token.
    pub async fn register(
        &self,
        peer: SocketAddr,
        parent: &CancellationToken,
    ) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();
        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            LiveConnection {
                peer,
                token: token.clone(),
            },
        );
        (id, token)
    }

    pub async fn remove(&self, id: u64) {
        let mut connections = self.connections.write().await;
        connections.remove(&id);
    }

    /// Cancel every tracked connection. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let mut connections = self.connections.write().await;
        let count = connections.len();
        for (_, connection) in connections.drain() {
            debug!(peer = %connection.peer, "closing TCP dialout connection");
            connection.token.cancel();
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

/// Listener for routers streaming framed GPB packets over plain TCP.
pub struct TcpDialoutServer {
    listener: TcpListener,
    max_msg_len: u32,
    accumulator: Arc<dyn Accumulator>,
    connections: Arc<ConnectionRegistry>,
}

impl TcpDialoutServer {
    /// Bind the listening socket. Failing here is fatal to startup.
    pub async fn bind(
        address: &str,
        max_msg_len: u32,
        accumulator: Arc<dyn Accumulator>,
    ) -> MdtResult<Self> {
        let listener = bind_listener(address).await?;

        Ok(Self {
            listener,
            max_msg_len,
            accumulator,
            connections: Arc::new(ConnectionRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> MdtResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MdtError::InvalidAddress {
                address: "tcp listener".to_string(),
                reason: e.to_string(),
            })
    }

    /// Accept connections until `shutdown` fires, spawning one worker per
    /// connection onto `tracker`. Closes the listener and every live
    /// connection before returning.
    pub async fn run(self, shutdown: CancellationToken, tracker: TaskTracker) {
        let local_addr = self.listener.local_addr().ok();
        info!(address = ?local_addr, "TCP dialout listener started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let (id, token) = self.connections.register(peer, &shutdown).await;
                        let accumulator = Arc::clone(&self.accumulator);
                        let connections = Arc::clone(&self.connections);
                        let max_msg_len = self.max_msg_len;

                        tracker.spawn(async move {
                            serve_connection(stream, peer, max_msg_len, accumulator.as_ref(), &token)
                                .await;
                            connections.remove(id).await;
                        });
                    }
                    Err(e) => {
                        if shutdown.is_cancelled() {
                            break;
                        }
                        warn!(error = %e, "failed to accept TCP dialout connection");
                        self.accumulator.add_error(MdtError::Accept(e));
                    }
                }
            }
        }

        let closed = self.connections.close_all().await;
        drop(self.listener);
        info!(closed_connections = closed, "TCP dialout listener stopped");
    }
}

#[instrument(skip_all, fields(peer = %peer))]
async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    max_msg_len: u32,
    accumulator: &dyn Accumulator,
    token: &CancellationToken,
) where
    S: AsyncRead + Unpin,
{
    debug!("accepted TCP dialout connection");
    handle_connection(stream, max_msg_len, accumulator, token).await;
    debug!("closed TCP dialout connection");
}

/// Read framed packets from `stream` until the peer closes it, a framing
/// error occurs or `token` is cancelled.
///
/// A clean close on a header boundary is not an error. Errors observed after
/// cancellation are not reported.
pub async fn handle_connection<S>(
    mut stream: S,
    max_msg_len: u32,
    accumulator: &dyn Accumulator,
    token: &CancellationToken,
) where
    S: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    let mut payload = BytesMut::new();

    loop {
        let header = tokio::select! {
            _ = token.cancelled() => break,
            read = read_header(&mut stream, &mut header_buf) => match read {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => {
                    if !token.is_cancelled() {
                        accumulator.add_error(MdtError::HeaderRead(e));
                    }
                    break;
                }
            }
        };

        if let Err(e) = header.validate(max_msg_len) {
            accumulator.add_error(e);
            break;
        }

        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = read_payload(&mut stream, header.msg_len, &mut payload) => read,
        };

        if let Err(e) = read {
            if !token.is_cancelled() {
                let error = match e.kind() {
                    io::ErrorKind::UnexpectedEof => MdtError::PrematureEof,
                    _ => MdtError::PayloadRead(e),
                };
                accumulator.add_error(error);
            }
            break;
        }

        handle_telemetry(&payload, accumulator);
    }
}

/// Read exactly `len` payload bytes into `payload`, growing it only as data
/// arrives so a stalled peer cannot pin a full `MsgLen` allocation.
async fn read_payload<S>(stream: &mut S, len: u32, payload: &mut BytesMut) -> io::Result<()>
where
    S: AsyncRead + Unpin,
{
    payload.clear();
    let mut limited = stream.take(u64::from(len));
    while payload.len() < len as usize {
        if limited.read_buf(payload).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a dialout payload",
            ));
        }
    }
    Ok(())
}

/// Fill `buf` with one header. `Ok(None)` means the peer closed the stream
/// before sending any header byte.
async fn read_header<S>(
    stream: &mut S,
    buf: &mut [u8; HEADER_SIZE],
) -> io::Result<Option<DialoutHeader>>
where
    S: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a dialout header",
            ));
        }
        filled += n;
    }
    Ok(Some(DialoutHeader::decode(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockAccumulator, DEFAULT_TCP_MAX_MSG_LEN};
    use crate::proto::telemetry::telemetry::NodeId;
    use crate::proto::telemetry::telemetry_field::ValueByType;
    use crate::proto::telemetry::{Telemetry, TelemetryField};
    use prost::Message;
    use tokio::io::AsyncWriteExt;

    fn leaf(name: &str, value: ValueByType) -> TelemetryField {
        TelemetryField {
            name: name.to_string(),
            value_by_type: Some(value),
            ..Default::default()
        }
    }

    fn node(name: &str, fields: Vec<TelemetryField>) -> TelemetryField {
        TelemetryField {
            name: name.to_string(),
            fields,
            ..Default::default()
        }
    }

    fn sample_payload() -> Vec<u8> {
        Telemetry {
            encoding_path: "type:model/some/path".to_string(),
            node_id: Some(NodeId::NodeIdStr("hostname".to_string())),
            msg_timestamp: 1_543_236_572_000,
            data_gpbkv: vec![TelemetryField {
                timestamp: 1_543_236_572_000,
                fields: vec![
                    node("keys", vec![leaf("name", ValueByType::StringValue("str".into()))]),
                    node("content", vec![leaf("value", ValueByType::Sint64Value(-1))]),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn frame(header: DialoutHeader, payload: &[u8]) -> Vec<u8> {
        let mut out = header.encode().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_valid_frames_produce_measurements() {
        let payload = sample_payload();
        let mut bytes = frame(DialoutHeader::for_payload(payload.len() as u32), &payload);
        bytes.extend(frame(DialoutHeader::for_payload(payload.len() as u32), &payload));

        let mut accumulator = MockAccumulator::new();
        accumulator
            .expect_add_measurement()
            .withf(|m| m.path == "type:model/some/path" && m.tags["name"] == "str")
            .times(2)
            .return_const(());
        accumulator.expect_add_error().times(0);

        let token = CancellationToken::new();
        handle_connection(&bytes[..], DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &token).await;
    }

    #[tokio::test]
    async fn test_clean_eof_is_not_an_error() {
        let mut accumulator = MockAccumulator::new();
        accumulator.expect_add_measurement().times(0);
        accumulator.expect_add_error().times(0);

        let token = CancellationToken::new();
        handle_connection(&[][..], DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &token).await;
    }

    #[tokio::test]
    async fn test_partial_header_is_reported() {
        let mut accumulator = MockAccumulator::new();
        accumulator
            .expect_add_error()
            .withf(|e| matches!(e, MdtError::HeaderRead(_)))
            .times(1)
            .return_const(());

        let token = CancellationToken::new();
        handle_connection(&[0u8, 0, 0, 0, 0][..], DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &token)
            .await;
    }

    #[tokio::test]
    async fn test_non_zero_flags_close_connection() {
        let payload = sample_payload();
        let mut header = DialoutHeader::for_payload(payload.len() as u32);
        header.msg_flags = 1;
        let mut bytes = frame(header, &payload);
        bytes.extend(frame(DialoutHeader::for_payload(payload.len() as u32), &payload));

        let mut accumulator = MockAccumulator::new();
        accumulator.expect_add_measurement().times(0);
        accumulator
            .expect_add_error()
            .withf(|e| matches!(e, MdtError::InvalidFlags(1)))
            .times(1)
            .return_const(());

        let token = CancellationToken::new();
        handle_connection(&bytes[..], DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &token).await;
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected_before_reading() {
        let bytes = DialoutHeader::for_payload(DEFAULT_TCP_MAX_MSG_LEN + 1)
            .encode()
            .to_vec();

        let mut accumulator = MockAccumulator::new();
        accumulator
            .expect_add_error()
            .withf(|e| matches!(e, MdtError::PayloadTooLong { .. }))
            .times(1)
            .return_const(());

        let token = CancellationToken::new();
        handle_connection(&bytes[..], DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &token).await;
    }

    #[tokio::test]
    async fn test_truncated_payload_is_premature_eof() {
        let payload = sample_payload();
        let bytes = frame(
            DialoutHeader::for_payload(payload.len() as u32),
            &payload[..payload.len() / 2],
        );

        let mut accumulator = MockAccumulator::new();
        accumulator.expect_add_measurement().times(0);
        accumulator
            .expect_add_error()
            .withf(|e| matches!(e, MdtError::PrematureEof))
            .times(1)
            .return_const(());

        let token = CancellationToken::new();
        handle_connection(&bytes[..], DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &token).await;
    }

    #[tokio::test]
    async fn test_payload_buffer_grows_with_received_bytes() {
        let claimed = DEFAULT_TCP_MAX_MSG_LEN;
        let mut payload = BytesMut::new();
        let mut stream: &[u8] = &[1, 2, 3, 4];

        let err = read_payload(&mut stream, claimed, &mut payload)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(&payload[..], &[1, 2, 3, 4]);
        assert!(payload.capacity() < claimed as usize);
    }

    #[tokio::test]
    async fn test_payload_read_stops_at_frame_boundary() {
        let mut payload = BytesMut::new();
        let mut stream: &[u8] = &[1, 2, 3, 4, 5, 6];

        read_payload(&mut stream, 4, &mut payload).await.unwrap();
        assert_eq!(&payload[..], &[1, 2, 3, 4]);
        assert_eq!(stream, &[5, 6]);
    }

    #[tokio::test]
    async fn test_undecodable_payload_keeps_connection_open() {
        let garbage = [0xffu8, 0xff, 0xff];
        let payload = sample_payload();
        let mut bytes = frame(DialoutHeader::for_payload(garbage.len() as u32), &garbage);
        bytes.extend(frame(DialoutHeader::for_payload(payload.len() as u32), &payload));

        let mut accumulator = MockAccumulator::new();
        accumulator
            .expect_add_error()
            .withf(|e| matches!(e, MdtError::Decode(_)))
            .times(1)
            .return_const(());
        accumulator.expect_add_measurement().times(1).return_const(());

        let token = CancellationToken::new();
        handle_connection(&bytes[..], DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &token).await;
    }

    #[tokio::test]
    async fn test_cancellation_suppresses_errors() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut accumulator = MockAccumulator::new();
        accumulator.expect_add_error().times(0);
        accumulator.expect_add_measurement().times(0);

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let worker = async move {
            handle_connection(server, DEFAULT_TCP_MAX_MSG_LEN, &accumulator, &worker_token).await;
        };

        client.write_all(&[0u8; 4]).await.unwrap();
        token.cancel();
        worker.await;
    }

    #[tokio::test]
    async fn test_registry_close_all_cancels_connections() {
        let registry = ConnectionRegistry::new();
        let parent = CancellationToken::new();
        let peer: SocketAddr = "127.0.0.1:1000".parse().unwrap();

        let (first, first_token) = registry.register(peer, &parent).await;
        let (_, second_token) = registry.register(peer, &parent).await;
        assert_eq!(registry.len().await, 2);

        registry.remove(first).await;
        assert_eq!(registry.len().await, 1);
        assert!(!first_token.is_cancelled());

        assert_eq!(registry.close_all().await, 1);
        assert!(second_token.is_cancelled());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_connections() {
        let registry = ConnectionRegistry::new();
        let parent = CancellationToken::new();
        let peer: SocketAddr = "127.0.0.1:1000".parse().unwrap();

        let (_, token) = registry.register(peer, &parent).await;
        parent.cancel();
        assert!(token.is_cancelled());
    }
}
