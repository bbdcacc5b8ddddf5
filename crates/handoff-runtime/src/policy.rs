//! Latency hysteresis
//!
//! Two thresholds with a dead zone between them keep the controller from
//! flapping when latency hovers around a single value.

use std::time::Duration;

use handoff_core::{HealthSample, HealthSignal, MonitorConfig, TransitionCause};

/// Classifies health samples into degrade/promote signals
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HysteresisPolicy {
    /// Promote when latency is strictly below this
    pub promote_below: Duration,
    /// Demote when latency is strictly above this
    pub demote_above: Duration,
    /// Consecutive promote signals needed before promoting
    pub promote_after: u32,
}

impl HysteresisPolicy {
    pub fn new(promote_below: Duration, demote_above: Duration) -> Self {
        HysteresisPolicy {
            promote_below,
            demote_above,
            promote_after: 1,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        HysteresisPolicy {
            promote_below: config.promote_below(),
            demote_above: config.demote_above(),
            promote_after: config.promote_after.max(1),
        }
    }

    pub fn with_promote_after(mut self, samples: u32) -> Self {
        self.promote_after = samples.max(1);
        self
    }

    /// Signal for one sample, independent of the current mode.
    ///
    /// Unreachable or above the demote threshold degrades, below the
    /// promote threshold promotes, anything in between is the dead zone.
    pub fn classify(&self, sample: &HealthSample) -> Option<HealthSignal> {
        match sample.latency {
            None => Some(HealthSignal::Degrade),
            Some(_) if !sample.reachable => Some(HealthSignal::Degrade),
            Some(latency) if latency > self.demote_above => Some(HealthSignal::Degrade),
            Some(latency) if latency < self.promote_below => Some(HealthSignal::Promote),
            Some(_) => None,
        }
    }

    /// Transition cause recorded for a signal raised by `sample`
    pub fn cause(signal: HealthSignal, sample: &HealthSample) -> TransitionCause {
        match (signal, sample.latency) {
            (HealthSignal::Degrade, Some(latency)) if sample.reachable => {
                TransitionCause::LatencyDegraded { latency }
            }
            (HealthSignal::Degrade, _) => TransitionCause::Unreachable,
            (HealthSignal::Promote, latency) => TransitionCause::LatencyRecovered {
                latency: latency.unwrap_or_default(),
            },
        }
    }
}

impl Default for HysteresisPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}
