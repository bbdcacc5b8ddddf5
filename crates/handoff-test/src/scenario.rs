//! Controller scenarios
//!
//! A controller wired to scripted back ends, driven step by step with probe
//! results and frames. The local back end answers a hand at 0.25 and the
//! remote one a hand at 0.75, so every result shows where it came from.

use std::sync::Arc;

use image::RgbImage;

use handoff_core::{BackendError, HealthSample, ModeTransition, OffloadMode, Pose};
use handoff_runtime::{HysteresisPolicy, Inference, OffloadController};

use crate::{test_hand, BackendScript, LatencySimulator, ScriptedBackend, ScriptedConnector};

/// Pose produced by the scenario's local back end
pub fn local_pose() -> Pose {
    test_hand(0.25)
}

/// Pose produced by the scenario's remote back end
pub fn remote_pose() -> Pose {
    test_hand(0.75)
}

/// One step of a scenario
#[derive(Clone, Debug)]
pub enum Step {
    Probe(HealthSample),
    Frame,
}

/// What one step did
#[derive(Clone, Debug)]
pub struct StepRecord {
    /// Mode after the step
    pub mode: OffloadMode,
    pub transition: Option<ModeTransition>,
    pub inference: Option<Result<Inference, BackendError>>,
}

/// Summary of a simulated run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScenarioReport {
    pub probes: u64,
    pub frames: u64,
    pub failed_frames: u64,
    pub remote_frames: u64,
    pub local_frames: u64,
    pub transitions: u64,
}

pub type ScenarioController = OffloadController<ScriptedBackend, ScriptedConnector>;

/// Scripted controller harness
pub struct Scenario {
    controller: Arc<ScenarioController>,
    local: Arc<BackendScript>,
    remote: Arc<BackendScript>,
    frame: RgbImage,
}

impl Scenario {
    pub fn new(policy: HysteresisPolicy) -> Self {
        let local = BackendScript::answering(local_pose());
        let remote = BackendScript::answering(remote_pose());
        let controller = OffloadController::new(
            ScriptedBackend::new(Arc::clone(&local)),
            ScriptedConnector::new(Arc::clone(&remote)),
            policy,
        );

        Scenario {
            controller: Arc::new(controller),
            local,
            remote,
            frame: RgbImage::new(64, 48),
        }
    }

    pub fn controller(&self) -> &Arc<ScenarioController> {
        &self.controller
    }

    pub fn local_script(&self) -> &Arc<BackendScript> {
        &self.local
    }

    pub fn remote_script(&self) -> &Arc<BackendScript> {
        &self.remote
    }

    pub fn mode(&self) -> OffloadMode {
        self.controller.mode()
    }

    /// Feed one probe result
    pub fn observe(&self, sample: HealthSample) -> Option<ModeTransition> {
        self.controller.observe(&sample)
    }

    /// Feed latencies in milliseconds, returning the mode after each
    pub fn probe_millis(&self, latencies: &[u64]) -> Vec<OffloadMode> {
        latencies
            .iter()
            .map(|ms| {
                self.observe(HealthSample::from_millis(*ms));
                self.mode()
            })
            .collect()
    }

    /// Run one frame through the controller
    pub async fn frame(&self) -> Result<Inference, BackendError> {
        self.controller.infer(&self.frame).await
    }

    /// Execute steps in order
    pub async fn run(&self, steps: impl IntoIterator<Item = Step>) -> Vec<StepRecord> {
        let mut records = Vec::new();
        for step in steps {
            let record = match step {
                Step::Probe(sample) => StepRecord {
                    transition: self.observe(sample),
                    inference: None,
                    mode: self.mode(),
                },
                Step::Frame => StepRecord {
                    inference: Some(self.frame().await),
                    transition: None,
                    mode: self.mode(),
                },
            };
            records.push(record);
        }
        records
    }

    /// Alternate `probes_per_frame` simulated probes with one frame, `frames` times
    pub async fn simulate(
        &self,
        sim: &mut LatencySimulator,
        probes_per_frame: usize,
        frames: usize,
    ) -> ScenarioReport {
        let mut report = ScenarioReport::default();
        let before = self.controller.stats().transitions();

        for _ in 0..frames {
            for _ in 0..probes_per_frame {
                self.observe(sim.next_sample());
                report.probes += 1;
            }

            report.frames += 1;
            match self.frame().await {
                Ok(inference) => match inference.mode {
                    OffloadMode::Remote => report.remote_frames += 1,
                    OffloadMode::Local => report.local_frames += 1,
                },
                Err(_) => report.failed_frames += 1,
            }
        }

        report.transitions = self.controller.stats().transitions() - before;
        report
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new(HysteresisPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::LatencyProfile;

    #[tokio::test]
    async fn test_poses_identify_backend() {
        let scenario = Scenario::default();
        let remote = scenario.frame().await.unwrap();
        assert_eq!(remote.pose, remote_pose());

        scenario.observe(HealthSample::unreachable());
        let local = scenario.frame().await.unwrap();
        assert_eq!(local.pose, local_pose());
        assert_eq!(local.mode, OffloadMode::Local);
    }

    #[tokio::test]
    async fn test_run_records_each_step() {
        let scenario = Scenario::default();
        let records = scenario
            .run(vec![
                Step::Frame,
                Step::Probe(HealthSample::from_millis(300)),
                Step::Frame,
            ])
            .await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].mode, OffloadMode::Remote);
        assert!(records[1].transition.as_ref().is_some_and(|t| t.is_demotion()));
        let last = records[2].inference.clone().unwrap().unwrap();
        assert_eq!(last.mode, OffloadMode::Local);
    }

    #[tokio::test]
    async fn test_good_link_never_leaves_remote() {
        let scenario = Scenario::default();
        let mut sim = LatencySimulator::new(LatencyProfile::good(), 99);
        let report = scenario.simulate(&mut sim, 3, 100).await;

        assert_eq!(report.remote_frames, 100);
        assert_eq!(report.transitions, 0);
        assert_eq!(scenario.remote_script().calls(), 100);
        assert_eq!(scenario.local_script().calls(), 0);
    }

    #[test]
    fn test_probe_millis_reports_modes() {
        let policy = HysteresisPolicy::new(Duration::from_millis(50), Duration::from_millis(100));
        let scenario = Scenario::new(policy);
        assert_eq!(
            scenario.probe_millis(&[150, 75, 20]),
            vec![OffloadMode::Local, OffloadMode::Local, OffloadMode::Remote]
        );
    }
}
