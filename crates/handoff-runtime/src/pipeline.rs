//! Capture → infer → render loop
//!
//! The loop owns the frame source; the core only ever sees preprocessed
//! frames through `OffloadController::infer`. A frame that fails is logged,
//! counted and skipped; nothing short of the source ending or a shutdown
//! signal stops the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbImage;
use tokio::sync::watch;

use handoff_backend::{InferenceBackend, RemoteConnector};
use handoff_core::{HandoffResult, OffloadMode, PipelineConfig, Pose};

use crate::{MetricsCollector, OffloadController};

/// Consecutive source errors after which the source is considered gone
const MAX_SOURCE_ERRORS: u32 = 30;

/// Where frames come from (camera, files, ...)
pub trait FrameSource: Send {
    /// Next frame, or `Ok(None)` at end of stream
    fn next_frame(&mut self) -> HandoffResult<Option<RgbImage>>;
}

/// Where results go (overlay, log, ...)
pub trait FrameSink: Send {
    fn render(&mut self, frame: &RgbImage, outcome: &FrameOutcome);
}

/// Result of one processed frame
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    pub index: u64,
    pub pose: Pose,
    /// Back end that produced `pose`
    pub mode: OffloadMode,
    /// Whether the frame was retried locally after a remote failure
    pub fell_back: bool,
    /// Time spent in inference
    pub latency: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub failed_frames: u64,
    pub source_errors: u64,
}

/// Mirror and resize a captured frame for inference
pub fn preprocess(mut frame: RgbImage, config: &PipelineConfig) -> RgbImage {
    if config.mirror {
        imageops::flip_horizontal_in_place(&mut frame);
    }
    if frame.dimensions() != (config.frame_width, config.frame_height) {
        frame = imageops::resize(&frame, config.frame_width, config.frame_height, FilterType::Triangle);
    }
    frame
}

/// Drives frames from a source through the controller into a sink
pub struct PipelineLoop<S, K, L, C: RemoteConnector> {
    source: S,
    sink: K,
    controller: Arc<OffloadController<L, C>>,
    config: PipelineConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<S, K, L, C> PipelineLoop<S, K, L, C>
where
    S: FrameSource,
    K: FrameSink,
    L: InferenceBackend,
    C: RemoteConnector,
{
    pub fn new(source: S, sink: K, controller: Arc<OffloadController<L, C>>, config: PipelineConfig) -> Self {
        PipelineLoop {
            source,
            sink,
            controller,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Process frames until the source ends or `shutdown` turns true
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> PipelineStats {
        let mut stats = PipelineStats::default();
        let mut consecutive_errors = 0u32;
        let mut index = 0u64;

        loop {
            if *shutdown.borrow() {
                tracing::info!("pipeline stopping on shutdown");
                break;
            }

            let raw = match self.source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    frame
                }
                Ok(None) => {
                    tracing::info!(frames = stats.frames, "frame source exhausted");
                    break;
                }
                Err(e) => {
                    stats.source_errors += 1;
                    consecutive_errors += 1;
                    tracing::warn!(error = %e, "frame capture failed, skipping");
                    if consecutive_errors >= MAX_SOURCE_ERRORS {
                        tracing::error!(consecutive_errors, "frame source keeps failing, stopping");
                        break;
                    }
                    continue;
                }
            };

            let frame = preprocess(raw, &self.config);
            let started = Instant::now();
            let result = self.controller.infer(&frame).await;
            let latency = started.elapsed();

            match result {
                Ok(inference) => {
                    let outcome = FrameOutcome {
                        index,
                        fell_back: inference.fell_back(),
                        pose: inference.pose,
                        mode: inference.mode,
                        latency,
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.record_frame(latency, outcome.mode, outcome.fell_back);
                    }
                    tracing::trace!(
                        index,
                        mode = %outcome.mode,
                        hand = outcome.pose.is_present(),
                        latency_ms = latency.as_secs_f64() * 1000.0,
                        "frame processed"
                    );
                    self.sink.render(&frame, &outcome);
                    stats.frames += 1;
                }
                Err(e) => {
                    stats.failed_frames += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failure();
                    }
                    tracing::warn!(index, error = %e, "frame failed, skipping");
                }
            }
            index += 1;

            // Let the probe and sampler tasks run between frames
            tokio::task::yield_now().await;
        }

        stats
    }
}
