use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Server, ServerTlsConfig};
use tracing::{debug, error, info};

use crate::domain::{Accumulator, MdtError, MdtResult};
use crate::grpc::MdtDialoutService;
use crate::proto::mdt_dialout::g_rpc_mdt_dialout_server::GRpcMdtDialoutServer;
use crate::tcp::bind_listener;

/// gRPC listener hosting [`MdtDialoutService`].
///
/// The socket is bound and TLS is configured by [`GrpcDialoutServer::bind`],
/// so both failures surface at startup rather than once serving.
pub struct GrpcDialoutServer {
    listener: TcpListener,
    server: Server,
    max_msg_size: Option<usize>,
    accumulator: Arc<dyn Accumulator>,
}

impl GrpcDialoutServer {
    pub async fn bind(
        address: &str,
        tls: Option<ServerTlsConfig>,
        max_msg_size: Option<usize>,
        accumulator: Arc<dyn Accumulator>,
    ) -> MdtResult<Self> {
        let mut server = Server::builder();
        if let Some(tls) = tls {
            server = server
                .tls_config(tls)
                .map_err(|e| MdtError::Tls(e.to_string()))?;
        }

        let listener = bind_listener(address).await?;

        Ok(Self {
            listener,
            server,
            max_msg_size,
            accumulator,
        })
    }

    pub fn local_addr(&self) -> MdtResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| MdtError::InvalidAddress {
                address: "grpc listener".to_string(),
                reason: e.to_string(),
            })
    }

    /// Serve until `shutdown` fires. Stopping the server ends every open
    /// dialout stream.
    pub async fn run(self, shutdown: CancellationToken) {
        let local_addr = self.listener.local_addr().ok();
        info!(address = ?local_addr, "gRPC dialout listener started");

        let service = MdtDialoutService::new(Arc::clone(&self.accumulator), shutdown.clone());
        let mut service = GRpcMdtDialoutServer::new(service);
        if let Some(limit) = self.max_msg_size {
            service = service.max_decoding_message_size(limit);
        }

        let mut server = self.server;
        let incoming = TcpListenerStream::new(self.listener);
        let signal = async move {
            shutdown.cancelled().await;
            debug!("gRPC dialout shutdown signal received");
        };

        match server
            .add_service(service)
            .serve_with_incoming_shutdown(incoming, signal)
            .await
        {
            Ok(()) => info!("gRPC dialout listener stopped"),
            Err(e) => {
                error!(error = %e, "gRPC dialout server error");
                self.accumulator.add_error(MdtError::Serve(e));
            }
        }
    }
}
