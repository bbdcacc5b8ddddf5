//! Resource sampling and the end-of-run performance report

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use handoff_core::{MetricsConfig, OffloadMode};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Running count, sum and extremes of one series
#[derive(Clone, Copy, Debug, Default)]
struct Summary {
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Summary {
    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Default)]
struct MetricsState {
    frames: u64,
    frame_time: Duration,
    fps: Summary,
    cpu_percent: Summary,
    memory_mb: Summary,
    local_frames: u64,
    remote_frames: u64,
    fallbacks: u64,
    failed_frames: u64,
}

/// Collects per-frame timings and process resource usage
pub struct MetricsCollector {
    sample_interval: Duration,
    /// mAh per CPU-percent per minute
    energy_coefficient: f64,
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        MetricsCollector {
            sample_interval: config.sample_interval,
            energy_coefficient: config.energy_coefficient,
            state: Mutex::new(MetricsState::default()),
        }
    }

    /// A frame that produced a pose
    pub fn record_frame(&self, elapsed: Duration, mode: OffloadMode, fell_back: bool) {
        let mut state = self.state.lock();
        state.frames += 1;
        state.frame_time += elapsed;
        if !elapsed.is_zero() {
            state.fps.add(1.0 / elapsed.as_secs_f64());
        }
        match mode {
            OffloadMode::Local => state.local_frames += 1,
            OffloadMode::Remote => state.remote_frames += 1,
        }
        if fell_back {
            state.fallbacks += 1;
        }
    }

    /// A frame that was skipped after a hard failure
    pub fn record_failure(&self) {
        self.state.lock().failed_frames += 1;
    }

    pub fn record_resources(&self, cpu_percent: f32, memory_mb: f64) {
        let mut state = self.state.lock();
        state.cpu_percent.add(cpu_percent as f64);
        state.memory_mb.add(memory_mb);
    }

    pub fn resource_samples(&self) -> usize {
        self.state.lock().cpu_percent.count as usize
    }

    /// Sample this process every `sample_interval` until shutdown.
    /// Returns the number of samples taken.
    pub async fn run_sampler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> usize {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!(error = e, "process id unavailable, resource sampling disabled");
                return 0;
            }
        };

        let mut system = System::new();
        let mut ticker = time::interval(self.sample_interval.max(MIN_SAMPLE_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut samples = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    system.refresh_process(pid);
                    if let Some(process) = system.process(pid) {
                        self.record_resources(process.cpu_usage(), process.memory() as f64 / BYTES_PER_MB);
                        samples += 1;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(samples, "resource sampler stopped");
        samples
    }

    /// Summarise everything recorded so far
    pub fn report(&self, final_mode: OffloadMode, transitions: u64) -> PerformanceReport {
        let state = self.state.lock();

        let frames = state.frames;
        let total_secs = state.frame_time.as_secs_f64();
        let avg_cpu = state.cpu_percent.mean();
        let run_minutes = total_secs / 60.0;
        // Scale the run's estimate to a 10 minute window
        let energy = if run_minutes > 0.0 {
            avg_cpu * run_minutes * self.energy_coefficient * (10.0 / run_minutes)
        } else {
            0.0
        };

        PerformanceReport {
            total_secs,
            frames,
            avg_latency_ms: if frames > 0 {
                total_secs * 1000.0 / frames as f64
            } else {
                0.0
            },
            avg_fps: state.fps.mean(),
            peak_fps: state.fps.max.unwrap_or(0.0),
            min_fps: state.fps.min.unwrap_or(0.0),
            avg_cpu_percent: avg_cpu,
            avg_memory_mb: state.memory_mb.mean(),
            energy_mah_per_10min: energy,
            local_frames: state.local_frames,
            remote_frames: state.remote_frames,
            fallbacks: state.fallbacks,
            failed_frames: state.failed_frames,
            transitions,
            final_mode: final_mode.label().to_string(),
        }
    }
}

/// End-of-run summary
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_secs: f64,
    pub frames: u64,
    pub avg_latency_ms: f64,
    pub avg_fps: f64,
    pub peak_fps: f64,
    pub min_fps: f64,
    pub avg_cpu_percent: f64,
    pub avg_memory_mb: f64,
    /// Estimated battery drain over 10 minutes at this load
    pub energy_mah_per_10min: f64,
    pub local_frames: u64,
    pub remote_frames: u64,
    pub fallbacks: u64,
    pub failed_frames: u64,
    pub transitions: u64,
    pub final_mode: String,
}

impl PerformanceReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:^60}", "Adaptive offload performance report")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Total run time       : {:.2} s", self.total_secs)?;
        writeln!(f, "Frames               : {}", self.frames)?;
        writeln!(f, "Average latency      : {:.2} ms", self.avg_latency_ms)?;
        writeln!(f, "Average FPS          : {:.1}", self.avg_fps)?;
        writeln!(f, "Average CPU          : {:.1}%", self.avg_cpu_percent)?;
        writeln!(f, "Average memory       : {:.1} MB", self.avg_memory_mb)?;
        writeln!(f, "Energy (10 min est.) : {:.1} mAh", self.energy_mah_per_10min)?;
        writeln!(f, "Peak FPS             : {:.1}", self.peak_fps)?;
        writeln!(f, "Min FPS              : {:.1}", self.min_fps)?;
        writeln!(
            f,
            "Frames local/remote  : {}/{}",
            self.local_frames, self.remote_frames
        )?;
        writeln!(f, "Fallbacks            : {}", self.fallbacks)?;
        writeln!(f, "Failed frames        : {}", self.failed_frames)?;
        writeln!(f, "Mode transitions     : {}", self.transitions)?;
        writeln!(f, "Final mode           : {}", self.final_mode)?;
        write!(f, "{}", rule)
    }
}
