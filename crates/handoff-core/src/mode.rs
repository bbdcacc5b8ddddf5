//! Offload mode - which back end serves inference

use std::fmt;
use std::time::Duration;

use crate::BackendError;

/// The active inference path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffloadMode {
    /// In-process inference
    Local,
    /// Inference on the remote service
    Remote,
}

impl OffloadMode {
    /// Mode a controller starts in
    pub const INITIAL: OffloadMode = OffloadMode::Remote;

    pub fn label(self) -> &'static str {
        match self {
            OffloadMode::Local => "local",
            OffloadMode::Remote => "remote",
        }
    }

    #[inline]
    pub fn is_remote(self) -> bool {
        self == OffloadMode::Remote
    }
}

impl fmt::Display for OffloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a mode transition happened
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionCause {
    /// Probe latency rose above the demote threshold
    LatencyDegraded { latency: Duration },
    /// Probe target could not be reached
    Unreachable,
    /// A remote call failed while in use
    BackendFailure(BackendError),
    /// Probe latency fell below the promote threshold
    LatencyRecovered { latency: Duration },
}

impl fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionCause::LatencyDegraded { latency } => {
                write!(f, "latency {}ms above demote threshold", latency.as_millis())
            }
            TransitionCause::Unreachable => f.write_str("network unreachable"),
            TransitionCause::BackendFailure(err) => write!(f, "remote call failed: {}", err),
            TransitionCause::LatencyRecovered { latency } => {
                write!(f, "latency {}ms below promote threshold", latency.as_millis())
            }
        }
    }
}

/// A completed mode change
#[derive(Debug, Clone, PartialEq)]
pub struct ModeTransition {
    pub from: OffloadMode,
    pub to: OffloadMode,
    pub cause: TransitionCause,
    /// Controller epoch after the transition
    pub epoch: u64,
}

impl ModeTransition {
    pub fn is_demotion(&self) -> bool {
        self.from == OffloadMode::Remote && self.to == OffloadMode::Local
    }

    pub fn is_promotion(&self) -> bool {
        self.from == OffloadMode::Local && self.to == OffloadMode::Remote
    }
}
