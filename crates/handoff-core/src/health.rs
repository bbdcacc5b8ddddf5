//! Network health samples produced by connectivity probes

use std::time::{Duration, SystemTime};

/// One reachability/latency measurement. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSample {
    /// Wall-clock time the probe completed
    pub timestamp: SystemTime,
    /// Whether the probe target answered within the timeout
    pub reachable: bool,
    /// Connect latency, present only when reachable
    pub latency: Option<Duration>,
}

impl HealthSample {
    /// A successful probe with measured latency
    pub fn reachable(latency: Duration) -> Self {
        HealthSample {
            timestamp: SystemTime::now(),
            reachable: true,
            latency: Some(latency),
        }
    }

    /// A failed or timed-out probe
    pub fn unreachable() -> Self {
        HealthSample {
            timestamp: SystemTime::now(),
            reachable: false,
            latency: None,
        }
    }

    /// Shorthand for tests and simulations
    pub fn from_millis(latency_ms: u64) -> Self {
        Self::reachable(Duration::from_millis(latency_ms))
    }

    /// Latency in fractional milliseconds
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency.map(|l| l.as_nanos() as f64 / 1_000_000.0)
    }
}

/// Decision derived from a health sample under the hysteresis policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    /// Move inference to the local back end
    Degrade,
    /// Move inference back to the remote service
    Promote,
}
