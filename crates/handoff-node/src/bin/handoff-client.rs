//! handoff adaptive client
//!
//! Runs hand-landmark inference over the frames in `HANDOFF_FRAMES_DIR`,
//! switching between the on-device network and the remote service as the
//! network allows. Prints a performance report when the frames run out or
//! on Ctrl-C.

use handoff_backend::{LocalBackend, RpcConnector};
use handoff_core::HandoffConfig;
use handoff_node::{DirectorySource, LogSink};
use handoff_runtime::{init_tracing, LogFormat, OffloadRuntime};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let config = HandoffConfig::from_env()?;
    let source = DirectorySource::from_env()?;
    let local = LocalBackend::load(&config.local)?;
    let connector = RpcConnector::new(config.remote.clone());

    tracing::info!(
        endpoint = %connector.endpoint(),
        probe_target = %config.monitor.probe_target,
        frames = source.len(),
        "starting adaptive client"
    );

    let runtime = OffloadRuntime::from_config(local, connector, &config);
    let pipeline = runtime
        .pipeline(source, LogSink::default(), config.pipeline.clone())
        .run(runtime.shutdown_signal());
    tokio::pin!(pipeline);

    let stats = tokio::select! {
        stats = &mut pipeline => stats,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, finishing the current frame");
            runtime.signal_shutdown();
            pipeline.await
        }
    };
    tracing::info!(
        frames = stats.frames,
        failed_frames = stats.failed_frames,
        source_errors = stats.source_errors,
        "pipeline finished"
    );

    let summary = runtime.shutdown().await;
    tracing::info!(
        probes = summary.monitor.probes,
        unreachable = summary.monitor.unreachable,
        resource_samples = summary.resource_samples,
        "background tasks joined"
    );

    println!("{}", summary.report);
    Ok(())
}
