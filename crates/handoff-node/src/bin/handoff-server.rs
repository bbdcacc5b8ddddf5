//! handoff inference service
//!
//! Loads the hand-landmark network and serves it over the detect RPC until
//! Ctrl-C. Configuration comes from the file named by `HANDOFF_CONFIG`.

use std::sync::Arc;

use tokio::sync::watch;

use handoff_backend::{DetectionService, LocalBackend};
use handoff_core::HandoffConfig;
use handoff_runtime::{init_tracing, LogFormat};
use handoff_transport::RpcServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let config = HandoffConfig::from_env()?;
    let backend =
        LocalBackend::load(&config.local)?.with_min_confidence(config.server.min_detection_confidence);

    let server = RpcServer::bind(&config.server.listen_addr, config.server.max_concurrent_requests).await?;
    tracing::info!(
        addr = %server.local_addr(),
        model = %config.local.model_path.display(),
        max_concurrent = config.server.max_concurrent_requests,
        "inference service listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C, serving until killed");
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl-C received, shutting down");
        shutdown_tx.send_replace(true);
    });

    let stats = server
        .serve(Arc::new(DetectionService::new(backend)), shutdown_rx)
        .await?;

    tracing::info!(
        connections = stats.connections,
        requests = stats.requests,
        error_responses = stats.error_responses,
        "inference service stopped"
    );
    Ok(())
}
