//! Runtime orchestration
//!
//! Starts the health monitor and the resource sampler next to a shared
//! controller and tears everything down in a fixed order: signal, join the
//! background tasks, then close the controller (which waits for in-flight
//! inference before dropping the remote connection).

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use handoff_backend::{InferenceBackend, RemoteConnector};
use handoff_core::{HandoffConfig, PipelineConfig};
use handoff_transport::{Probe, TcpProbe};

use crate::{
    FrameSink, FrameSource, MetricsCollector, MonitorStats, NetworkHealthMonitor, OffloadController,
    PerformanceReport, PipelineLoop,
};

/// What the background tasks did, reported at shutdown
#[derive(Clone, Debug)]
pub struct RuntimeSummary {
    pub monitor: MonitorStats,
    pub resource_samples: usize,
    pub report: PerformanceReport,
}

/// A controller plus its background tasks
pub struct OffloadRuntime<L, C: RemoteConnector> {
    controller: Arc<OffloadController<L, C>>,
    metrics: Arc<MetricsCollector>,
    shutdown_tx: watch::Sender<bool>,
    monitor: JoinHandle<MonitorStats>,
    sampler: JoinHandle<usize>,
}

impl<L: InferenceBackend, C: RemoteConnector> OffloadRuntime<L, C> {
    /// Build everything from configuration with a TCP probe.
    /// Must be called inside a tokio runtime.
    pub fn from_config(local: L, connector: C, config: &HandoffConfig) -> Self {
        let controller = Arc::new(OffloadController::from_config(local, connector, &config.monitor));
        let monitor = NetworkHealthMonitor::<TcpProbe>::from_config(&config.monitor);
        let metrics = Arc::new(MetricsCollector::new(&config.metrics));
        Self::start(controller, monitor, metrics)
    }

    /// Spawn the monitor and sampler tasks
    pub fn start<P: Probe + 'static>(
        controller: Arc<OffloadController<L, C>>,
        monitor: NetworkHealthMonitor<P>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = tokio::spawn(monitor.run(Arc::clone(&controller), shutdown_rx.clone()));
        let sampler = tokio::spawn(Arc::clone(&metrics).run_sampler(shutdown_rx));

        tracing::info!(mode = %controller.mode(), "offload runtime started");

        OffloadRuntime {
            controller,
            metrics,
            shutdown_tx,
            monitor,
            sampler,
        }
    }

    pub fn controller(&self) -> &Arc<OffloadController<L, C>> {
        &self.controller
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Receiver that turns true when shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Ask every task to stop without waiting
    pub fn signal_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// A pipeline wired to this runtime's controller and metrics
    pub fn pipeline<S: FrameSource, K: FrameSink>(
        &self,
        source: S,
        sink: K,
        config: PipelineConfig,
    ) -> PipelineLoop<S, K, L, C> {
        PipelineLoop::new(source, sink, Arc::clone(&self.controller), config)
            .with_metrics(Arc::clone(&self.metrics))
    }

    /// Stop in order and report
    pub async fn shutdown(self) -> RuntimeSummary {
        tracing::info!("offload runtime shutting down");
        self.shutdown_tx.send_replace(true);

        let monitor = match self.monitor.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "health monitor task failed");
                MonitorStats::default()
            }
        };
        let resource_samples = match self.sampler.await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::error!(error = %e, "resource sampler task failed");
                0
            }
        };

        self.controller.close().await;

        let stats = self.controller.stats();
        let report = self.metrics.report(self.controller.mode(), stats.transitions());
        tracing::info!(
            frames = report.frames,
            fallbacks = stats.fallbacks,
            transitions = stats.transitions(),
            "offload runtime stopped"
        );

        RuntimeSummary {
            monitor,
            resource_samples,
            report,
        }
    }
}
