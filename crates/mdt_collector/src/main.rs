mod config;
mod sink;
mod telemetry;
mod tls;

use config::ServiceConfig;
use mdt_telemetry::MdtTelemetry;
use sink::LineProtocolAccumulator;
use std::sync::Arc;
use telemetry::init_tracing;
use tls::PemFileTlsProvider;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    info!(
        transport = %config.transport,
        service_address = %config.service_address,
        "Starting mdt-collector"
    );
    debug!("Configuration: {:?}", config);

    let mut telemetry = MdtTelemetry::new(
        config.to_mdt_config(),
        Arc::new(LineProtocolAccumulator::stdout()),
        Arc::new(PemFileTlsProvider),
    );

    if let Err(e) = telemetry.start().await {
        error!(error = %e, "Failed to start Cisco MDT telemetry");
        std::process::exit(1);
    }

    shutdown_signal().await;

    telemetry.stop().await;
    info!("mdt-collector stopped");
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error setting up signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Error setting up SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal");
}
