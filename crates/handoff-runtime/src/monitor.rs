//! Network health monitor
//!
//! Wakes every probe interval but measures at most once per minimum probe
//! spacing, then feeds the sample to the controller together with the epoch
//! the probe started in.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use handoff_backend::{InferenceBackend, RemoteConnector};
use handoff_core::{HealthSample, ModeTransition, MonitorConfig};
use handoff_transport::{Probe, TcpProbe};

use crate::OffloadController;

/// Counters for the probe loop
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub probes: u64,
    /// Wake-ups skipped by the rate limit
    pub skipped: u64,
    pub unreachable: u64,
    pub transitions: u64,
}

/// Periodic connectivity probing
pub struct NetworkHealthMonitor<P> {
    probe: P,
    interval: Duration,
    min_spacing: Duration,
    last_probe: Option<Instant>,
    last_sample: Option<HealthSample>,
    stats: MonitorStats,
}

impl NetworkHealthMonitor<TcpProbe> {
    /// TCP probe against the configured target
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            TcpProbe::new(config.probe_target.clone(), config.probe_timeout),
            config.probe_interval,
            config.min_probe_spacing,
        )
    }
}

impl<P: Probe> NetworkHealthMonitor<P> {
    pub fn new(probe: P, interval: Duration, min_spacing: Duration) -> Self {
        NetworkHealthMonitor {
            probe,
            interval,
            min_spacing,
            last_probe: None,
            last_sample: None,
            stats: MonitorStats::default(),
        }
    }

    /// Whether a measurement is allowed at `now`
    pub fn due(&self, now: Instant) -> bool {
        match self.last_probe {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_spacing,
        }
    }

    pub fn last_sample(&self) -> Option<&HealthSample> {
        self.last_sample.as_ref()
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// One wake-up: probe if due and apply the result
    pub async fn tick<L, C>(&mut self, controller: &OffloadController<L, C>) -> Option<ModeTransition>
    where
        L: InferenceBackend,
        C: RemoteConnector,
    {
        let now = Instant::now();
        if !self.due(now) {
            self.stats.skipped += 1;
            return None;
        }
        self.last_probe = Some(now);

        let epoch = controller.epoch();
        let sample = self.probe.probe().await;

        self.stats.probes += 1;
        if !sample.reachable {
            self.stats.unreachable += 1;
        }
        tracing::debug!(
            reachable = sample.reachable,
            latency_ms = sample.latency_ms().unwrap_or(-1.0),
            mode = %controller.mode(),
            "network probe"
        );

        let transition = controller.observe_since(&sample, epoch);
        if transition.is_some() {
            self.stats.transitions += 1;
        }
        self.last_sample = Some(sample);
        transition
    }

    /// Probe until `shutdown` turns true or its sender goes away
    pub async fn run<L, C>(
        mut self,
        controller: Arc<OffloadController<L, C>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> MonitorStats
    where
        L: InferenceBackend,
        C: RemoteConnector,
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?self.interval,
            min_spacing = ?self.min_spacing,
            "network health monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    // An in-flight probe runs to completion (bounded by its timeout)
                    self.tick(&controller).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(stats = ?self.stats, "network health monitor stopped");
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use image::RgbImage;
    use parking_lot::Mutex;

    use handoff_core::{BackendError, OffloadMode, Pose};

    use crate::HysteresisPolicy;

    struct Sequence(Mutex<VecDeque<HealthSample>>);

    impl Sequence {
        fn millis(values: &[u64]) -> Self {
            Sequence(Mutex::new(
                values.iter().map(|ms| HealthSample::from_millis(*ms)).collect(),
            ))
        }
    }

    impl Probe for Sequence {
        async fn probe(&self) -> HealthSample {
            self.0
                .lock()
                .pop_front()
                .unwrap_or_else(|| HealthSample::from_millis(75))
        }
    }

    struct Nothing;

    impl InferenceBackend for Nothing {
        async fn detect(&self, _image: &RgbImage) -> Result<Pose, BackendError> {
            Ok(Pose::Absent)
        }
    }

    struct NothingConnector;

    impl RemoteConnector for NothingConnector {
        type Backend = Nothing;

        fn open(&self) -> Nothing {
            Nothing
        }
    }

    fn controller() -> OffloadController<Nothing, NothingConnector> {
        let policy = HysteresisPolicy::new(Duration::from_millis(50), Duration::from_millis(100));
        OffloadController::new(Nothing, NothingConnector, policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_skips_early_wakeups() {
        let ctl = controller();
        let mut monitor = NetworkHealthMonitor::new(
            Sequence::millis(&[150, 20]),
            Duration::from_secs(1),
            Duration::from_secs(3),
        );

        assert!(monitor.tick(&ctl).await.is_some());
        assert_eq!(ctl.mode(), OffloadMode::Local);

        time::advance(Duration::from_secs(1)).await;
        assert!(monitor.tick(&ctl).await.is_none());
        assert_eq!(monitor.stats().skipped, 1);

        time::advance(Duration::from_secs(2)).await;
        assert!(monitor.tick(&ctl).await.is_some());
        assert_eq!(ctl.mode(), OffloadMode::Remote);
        assert_eq!(monitor.stats().probes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let ctl = Arc::new(controller());
        let monitor = NetworkHealthMonitor::new(
            Sequence::millis(&[200]),
            Duration::from_secs(1),
            Duration::from_secs(3),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(Arc::clone(&ctl), rx));

        time::sleep(Duration::from_millis(4500)).await;
        tx.send(true).unwrap();
        let stats = task.await.unwrap();

        // Wake-ups at 0s..4s, measurements at 0s and 3s
        assert_eq!(stats.probes, 2);
        assert!(stats.skipped >= 2);
        assert_eq!(stats.transitions, 1);
        assert_eq!(ctl.mode(), OffloadMode::Local);
    }
}
