//! Configuration for every handoff component
//!
//! All values default to the reference deployment. A TOML file may override
//! any subset; durations are written as human-readable strings (`"3s"`,
//! `"100ms"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{HandoffError, HandoffResult};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "HANDOFF_CONFIG";

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub remote: RemoteConfig,
    pub monitor: MonitorConfig,
    pub local: LocalConfig,
    pub pipeline: PipelineConfig,
    pub metrics: MetricsConfig,
    pub server: ServerConfig,
}

/// Remote inference service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// `host:port` of the inference service
    pub endpoint: String,
    /// Deadline for one detect call, connect included
    #[serde(with = "duration_str")]
    pub call_timeout: Duration,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    /// JPEG quality for outbound frames (1-100)
    pub jpeg_quality: u8,
    /// Largest frame accepted in either direction
    pub max_message_bytes: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            endpoint: "127.0.0.1:50051".to_string(),
            call_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(2),
            jpeg_quality: 80,
            max_message_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Network health monitor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Well-known reachable `host:port` used as a latency proxy
    pub probe_target: String,
    /// How often the probe loop wakes up
    #[serde(with = "duration_str")]
    pub probe_interval: Duration,
    /// Minimum spacing between two actual measurements
    #[serde(with = "duration_str")]
    pub min_probe_spacing: Duration,
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
    /// Promote to remote when latency is strictly below this
    pub promote_below_ms: u64,
    /// Demote to local when latency is strictly above this
    pub demote_above_ms: u64,
    /// Consecutive probes below the promote threshold needed to promote
    pub promote_after: u32,
}

impl MonitorConfig {
    pub fn promote_below(&self) -> Duration {
        Duration::from_millis(self.promote_below_ms)
    }

    pub fn demote_above(&self) -> Duration {
        Duration::from_millis(self.demote_above_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            probe_target: "8.8.8.8:53".to_string(),
            probe_interval: Duration::from_secs(1),
            min_probe_spacing: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(2),
            promote_below_ms: 50,
            demote_above_ms: 100,
            promote_after: 2,
        }
    }
}

/// On-device landmark network
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// ONNX hand-landmark model
    pub model_path: PathBuf,
    /// Square input side expected by the model
    pub input_size: u32,
    /// Presence score below which a frame counts as "no hand"
    pub min_detection_confidence: f32,
    /// Hands tracked per frame; only 1 is supported
    pub max_hands: u8,
}

impl Default for LocalConfig {
    fn default() -> Self {
        LocalConfig {
            model_path: PathBuf::from("models/hand_landmark.onnx"),
            input_size: 224,
            min_detection_confidence: 0.5,
            max_hands: 1,
        }
    }
}

/// Frame preprocessing before inference
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Flip frames horizontally (selfie view)
    pub mirror: bool,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            mirror: true,
            frame_width: 640,
            frame_height: 480,
        }
    }
}

/// Resource sampling
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    #[serde(with = "duration_str")]
    pub sample_interval: Duration,
    /// Estimated mAh per CPU-percent per minute
    pub energy_coefficient: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            sample_interval: Duration::from_millis(100),
            energy_coefficient: 0.12,
        }
    }
}

/// Inference service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_concurrent_requests: usize,
    pub min_detection_confidence: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:50051".to_string(),
            max_concurrent_requests: 10,
            min_detection_confidence: 0.7,
        }
    }
}

impl HandoffConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> HandoffResult<Self> {
        let config: HandoffConfig =
            toml::from_str(source).map_err(|e| HandoffError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> HandoffResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| HandoffError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Load the file named by [`CONFIG_ENV`], or defaults when unset
    pub fn from_env() -> HandoffResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// Reject settings the controller cannot honor
    pub fn validate(&self) -> HandoffResult<()> {
        let monitor = &self.monitor;
        if monitor.promote_below_ms >= monitor.demote_above_ms {
            return Err(HandoffError::Config(format!(
                "promote_below_ms ({}) must be below demote_above_ms ({})",
                monitor.promote_below_ms, monitor.demote_above_ms
            )));
        }
        if monitor.promote_after == 0 {
            return Err(HandoffError::Config("promote_after must be at least 1".into()));
        }
        if monitor.probe_timeout.is_zero() || monitor.probe_interval.is_zero() {
            return Err(HandoffError::Config(
                "probe interval and timeout must be non-zero".into(),
            ));
        }
        if self.remote.call_timeout.is_zero() || self.remote.connect_timeout.is_zero() {
            return Err(HandoffError::Config("remote timeouts must be non-zero".into()));
        }
        if !(1..=100).contains(&self.remote.jpeg_quality) {
            return Err(HandoffError::Config(format!(
                "jpeg_quality {} outside 1..=100",
                self.remote.jpeg_quality
            )));
        }
        if self.local.max_hands != 1 {
            return Err(HandoffError::Config(format!(
                "max_hands {} unsupported, only 1 hand is tracked",
                self.local.max_hands
            )));
        }
        if self.local.input_size == 0 {
            return Err(HandoffError::Config("input_size must be non-zero".into()));
        }
        if self.pipeline.frame_width == 0 || self.pipeline.frame_height == 0 {
            return Err(HandoffError::Config(format!(
                "frame size {}x{} must be non-zero",
                self.pipeline.frame_width, self.pipeline.frame_height
            )));
        }
        if self.metrics.sample_interval.is_zero() {
            return Err(HandoffError::Config("metrics sample_interval must be non-zero".into()));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(HandoffError::Config(
                "max_concurrent_requests must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}
