//! ChainVault server entry point

use anyhow::Result;
use chainvault_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tracing::{info, warn};

use chainvault_server::{
    api, chain::ChainRegistry, config::Config, crypto::EncryptionLayer, ledger::Ledger,
    pipeline::Orchestrator, storage::ArtifactStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("chainvault-server".to_string())
        .filter_directives(
            "chainvault_server=debug,chainvault_convert=info,tower_http=debug,sqlx=warn".to_string(),
        )
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    let _log_guard = init_logging(&log_config)?;

    info!("Starting ChainVault server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let ledger = Ledger::connect(&config.ledger).await?;
    info!("Ledger ready");

    let storage = ArtifactStore::from_config(&config.storage).await?;
    info!(backend = storage.kind(), "Artifact storage initialized");

    let crypto = EncryptionLayer::from_config(&config.crypto).await?;
    let chains = ChainRegistry::from_config(&config.chain)?;
    info!(
        networks = ?chains.networks().collect::<Vec<_>>(),
        "Chain adapters initialized"
    );

    let orchestrator =
        Orchestrator::new(ledger.clone(), storage, crypto, chains, config.pipeline.clone());
    let report = orchestrator.recover().await?;
    info!(?report, "Pipeline ready");

    let app = api::router(orchestrator.clone(), &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Pipeline tasks and progress streams stop before connections are drained
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    let pipeline = orchestrator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            if !pipeline.shutdown(shutdown_timeout).await {
                warn!("Some pipeline tasks were abandoned, they resume on next start");
            }
        })
        .await?;

    ledger.close().await;
    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
