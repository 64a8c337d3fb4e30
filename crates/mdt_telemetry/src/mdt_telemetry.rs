use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::domain::{Accumulator, MdtConfig, MdtResult, TlsContextProvider, Transport};
use crate::grpc::{DialinClient, GrpcDialoutServer};
use crate::tcp::TcpDialoutServer;

/// Runs one configured transport and tears it down again.
///
/// All workers share one cancellation token and are spawned on one
/// [`TaskTracker`]; [`MdtTelemetry::stop`] returns once every one of them has
/// exited.
pub struct MdtTelemetry {
    config: MdtConfig,
    accumulator: Arc<dyn Accumulator>,
    tls_provider: Arc<dyn TlsContextProvider>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    local_addr: Option<SocketAddr>,
}

impl MdtTelemetry {
    pub fn new(
        config: MdtConfig,
        accumulator: Arc<dyn Accumulator>,
        tls_provider: Arc<dyn TlsContextProvider>,
    ) -> Self {
        Self {
            config,
            accumulator,
            tls_provider,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            local_addr: None,
        }
    }

    /// Start the configured transport.
    ///
    /// Fails without spawning anything on an unknown transport, a bind
    /// failure, an unusable dial address or bad TLS material.
    pub async fn start(&mut self) -> MdtResult<()> {
        let transport = self.config.transport()?;

        match transport {
            Transport::TcpDialout => {
                let server = TcpDialoutServer::bind(
                    &self.config.listen_address(),
                    self.config.tcp_max_msg_len(),
                    Arc::clone(&self.accumulator),
                )
                .await?;
                self.local_addr = Some(server.local_addr()?);
                self.tracker
                    .spawn(server.run(self.shutdown.clone(), self.tracker.clone()));
            }
            Transport::GrpcDialout => {
                let tls = if self.config.enable_tls {
                    Some(self.tls_provider.server_config(&self.config.tls_material())?)
                } else {
                    None
                };
                let server = GrpcDialoutServer::bind(
                    &self.config.listen_address(),
                    tls,
                    self.config.grpc_max_msg_size(),
                    Arc::clone(&self.accumulator),
                )
                .await?;
                self.local_addr = Some(server.local_addr()?);
                self.tracker.spawn(server.run(self.shutdown.clone()));
            }
            Transport::GrpcDialin => {
                let tls = if self.config.enable_tls {
                    Some(self.tls_provider.client_config(&self.config.tls_material())?)
                } else {
                    None
                };
                let client = DialinClient::new(&self.config, tls, Arc::clone(&self.accumulator))?;
                self.tracker.spawn(client.run(self.shutdown.clone()));
            }
        }

        info!(
            transport = %transport,
            service_address = %self.config.service_address,
            local_addr = ?self.local_addr,
            "Cisco MDT telemetry started"
        );
        Ok(())
    }

    /// Bound listener address for the dialout transports, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Cancel every worker and wait for all of them to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Cisco MDT telemetry stopped");
    }
}
