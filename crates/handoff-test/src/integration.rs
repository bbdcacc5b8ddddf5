//! End-to-end integration suite
//!
//! Checks the offload contract across crate boundaries:
//! - Hysteresis with a dead zone and promote confirmation
//! - Same-frame local retry after a remote failure
//! - Failure demotions winning over stale promotes
//! - Loopback RPC through a real detection service
//! - Shutdown waiting for in-flight inference

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use handoff_backend::{DetectionService, InferenceBackend};
use handoff_core::{HandoffResult, RemoteConfig};
use handoff_transport::{RpcServer, ServerStats};

/// A detection service on an ephemeral loopback port
pub struct LoopbackService {
    pub config: RemoteConfig,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<HandoffResult<ServerStats>>,
}

impl LoopbackService {
    /// Serve `backend` on `127.0.0.1:0`
    pub async fn spawn<B: InferenceBackend>(backend: B) -> HandoffResult<Self> {
        let server = RpcServer::bind("127.0.0.1:0", 4).await?;
        let config = RemoteConfig {
            endpoint: server.local_addr().to_string(),
            ..RemoteConfig::default()
        };
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(Arc::new(DetectionService::new(backend)), rx));

        Ok(LoopbackService {
            config,
            shutdown,
            task,
        })
    }

    /// Stop accepting, close open connections and wait for the server
    pub async fn stop(self) -> Option<ServerStats> {
        self.shutdown.send_replace(true);
        match self.task.await {
            Ok(Ok(stats)) => Some(stats),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use image::RgbImage;
    use proptest::prelude::*;

    use handoff_backend::RpcConnector;
    use handoff_core::{BackendError, HealthSample, OffloadMode, Pose, TransitionCause, LANDMARK_VALUES};
    use handoff_runtime::{HysteresisPolicy, NetworkHealthMonitor, OffloadController};
    use handoff_wire::{decode_pose, pose_from_bytes, DetectResponse, Message, LANDMARK_PAYLOAD_SIZE};

    use crate::{
        local_pose, remote_pose, BackendScript, LatencyProfile, LatencySimulator, Scenario, ScriptedBackend,
    };

    fn single_sample_policy() -> HysteresisPolicy {
        HysteresisPolicy::new(Duration::from_millis(50), Duration::from_millis(100))
    }

    #[test]
    fn test_hysteresis_sequence() {
        let scenario = Scenario::default();
        assert_eq!(scenario.controller().policy().promote_after, 2);

        let modes = scenario.probe_millis(&[40, 30, 120, 20]);
        assert_eq!(
            modes,
            vec![
                OffloadMode::Remote,
                OffloadMode::Remote,
                OffloadMode::Local,
                OffloadMode::Local,
            ]
        );

        // A second healthy sample confirms the recovery
        assert_eq!(scenario.probe_millis(&[20]), vec![OffloadMode::Remote]);
        assert_eq!(scenario.controller().remote_generation(), Some(2));
        assert_eq!(scenario.controller().stats().connections_opened, 2);
    }

    #[tokio::test]
    async fn test_timeout_retries_same_frame_locally() {
        let scenario = Scenario::default();
        scenario.remote_script().push(Err(BackendError::Timeout));

        let first = scenario.frame().await.unwrap();
        assert_eq!(first.mode, OffloadMode::Local);
        assert_eq!(first.pose, local_pose());
        assert_eq!(first.fallback, Some(BackendError::Timeout));
        assert_eq!(scenario.mode(), OffloadMode::Local);

        let history = scenario.controller().transitions();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].cause,
            TransitionCause::BackendFailure(BackendError::Timeout)
        );

        let second = scenario.frame().await.unwrap();
        assert_eq!(second.mode, OffloadMode::Local);
        assert!(!second.fell_back());
        assert_eq!(scenario.remote_script().calls(), 1);
        assert_eq!(scenario.local_script().calls(), 2);
    }

    #[tokio::test]
    async fn test_degrade_applies_to_next_frame() {
        let scenario = Scenario::default();
        let transition = scenario.observe(HealthSample::unreachable()).unwrap();
        assert_eq!(transition.cause, TransitionCause::Unreachable);

        let inference = scenario.frame().await.unwrap();
        assert_eq!(inference.mode, OffloadMode::Local);
        assert_eq!(scenario.remote_script().calls(), 0);
        assert_eq!(scenario.controller().remote_generation(), None);
    }

    #[tokio::test]
    async fn test_promote_uses_fresh_connection() {
        let scenario = Scenario::new(single_sample_policy());
        scenario.observe(HealthSample::from_millis(500));
        assert_eq!(scenario.controller().remote_generation(), None);

        scenario.observe(HealthSample::from_millis(10));
        assert_eq!(scenario.controller().remote_generation(), Some(2));

        let inference = scenario.frame().await.unwrap();
        assert_eq!(inference.mode, OffloadMode::Remote);
        assert_eq!(inference.pose, remote_pose());
    }

    #[tokio::test]
    async fn test_failure_demotion_beats_inflight_probe() {
        let scenario = Scenario::new(single_sample_policy());
        scenario.remote_script().push(Err(BackendError::TransportFailure("reset".into())));

        // Probe starts while Remote ...
        let probe_epoch = scenario.controller().epoch();
        // ... a frame fails and demotes ...
        scenario.frame().await.unwrap();
        assert_eq!(scenario.mode(), OffloadMode::Local);
        // ... and the probe's healthy result arrives late
        let late = scenario
            .controller()
            .observe_since(&HealthSample::from_millis(5), probe_epoch);

        assert!(late.is_none());
        assert_eq!(scenario.mode(), OffloadMode::Local);
        assert_eq!(scenario.controller().stats().stale_promotes, 1);
    }

    #[test]
    fn test_all_zero_landmarks_mean_no_hand() {
        assert_eq!(decode_pose(&[0.0; LANDMARK_VALUES]).unwrap(), Pose::Absent);
        assert_eq!(pose_from_bytes(&[0u8; LANDMARK_PAYLOAD_SIZE]).unwrap(), Pose::Absent);

        let bytes = DetectResponse::landmarks(9, Pose::Absent).encode().unwrap();
        match Message::parse(&bytes).unwrap() {
            Message::Response(response) => {
                assert_eq!(response.request_id, 9);
                assert_eq!(response.body.into_result().unwrap(), Pose::Absent);
            }
            other => panic!("expected a response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_loopback_rpc_then_outage() {
        let service = LoopbackService::spawn(ScriptedBackend::new(BackendScript::answering(remote_pose())))
            .await
            .unwrap();
        let local = BackendScript::answering(local_pose());
        let controller = OffloadController::new(
            ScriptedBackend::new(Arc::clone(&local)),
            RpcConnector::new(service.config.clone()),
            single_sample_policy(),
        );
        let frame = RgbImage::new(64, 48);

        let remote = controller.infer(&frame).await.unwrap();
        assert_eq!(remote.mode, OffloadMode::Remote);
        assert_eq!(remote.pose, remote_pose());

        let stats = service.stop().await.unwrap();
        assert_eq!(stats.requests, 1);

        // The service is gone: the frame still gets an answer, locally
        let fallback = controller.infer(&frame).await.unwrap();
        assert_eq!(fallback.mode, OffloadMode::Local);
        assert_eq!(fallback.pose, local_pose());
        assert!(fallback.fell_back());
        assert_eq!(controller.mode(), OffloadMode::Local);

        controller.close().await;
        assert_eq!(local.closes(), 1);
    }

    #[tokio::test]
    async fn test_close_waits_for_inflight_frame() {
        let scenario = Arc::new(Scenario::default());
        scenario.remote_script().set_delay(Duration::from_millis(150));

        let inflight = {
            let scenario = Arc::clone(&scenario);
            tokio::spawn(async move { scenario.frame().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        scenario.controller().close().await;
        // close() returned, so the call it waited for is already done
        assert!(inflight.is_finished());
        let result = inflight.await.unwrap().unwrap();
        assert_eq!(result.mode, OffloadMode::Remote);

        assert_eq!(scenario.remote_script().closes(), 1);
        assert_eq!(scenario.local_script().closes(), 1);
        assert!(matches!(
            scenario.frame().await,
            Err(BackendError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_hostile_link_never_drops_frames() {
        for seed in [1u64, 7, 42, 1234, 99_999] {
            let scenario = Scenario::default();
            let mut sim = LatencySimulator::new(LatencyProfile::hostile(), seed);
            let report = scenario.simulate(&mut sim, 1, 200).await;

            assert_eq!(report.failed_frames, 0, "seed {}", seed);
            assert_eq!(report.local_frames + report.remote_frames, 200);
            assert!(report.local_frames > report.remote_frames, "seed {}", seed);
            // Every promote is matched by the demote before it
            let stats = scenario.controller().stats();
            assert!(stats.demotions >= stats.promotions);
            assert!(stats.demotions - stats.promotions <= 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_over_poor_link() {
        let scenario = Scenario::default();
        let sim = LatencySimulator::new(LatencyProfile::poor(), 2024);
        let monitor = NetworkHealthMonitor::new(sim.into_probe(), Duration::from_secs(1), Duration::from_secs(3));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(Arc::clone(scenario.controller()), rx));
        tokio::time::sleep(Duration::from_secs(60)).await;
        tx.send(true).unwrap();
        let stats = task.await.unwrap();

        assert!(stats.probes >= 15);
        assert!(stats.skipped >= stats.probes);
        assert_eq!(stats.transitions, scenario.controller().stats().transitions());
    }

    fn latency_strategy() -> impl Strategy<Value = Option<u64>> {
        prop_oneof![
            1 => Just(None),
            9 => (0u64..400).prop_map(Some),
        ]
    }

    fn sample(latency: Option<u64>) -> HealthSample {
        match latency {
            Some(ms) => HealthSample::from_millis(ms),
            None => HealthSample::unreachable(),
        }
    }

    proptest! {
        #[test]
        fn prop_dead_zone_never_switches(
            start_local in any::<bool>(),
            latencies in prop::collection::vec(50u64..=100, 1..50),
        ) {
            let scenario = Scenario::new(single_sample_policy());
            if start_local {
                scenario.observe(HealthSample::unreachable());
            }
            let before = scenario.mode();
            let epoch = scenario.controller().epoch();

            for mode in scenario.probe_millis(&latencies) {
                prop_assert_eq!(mode, before);
            }
            prop_assert_eq!(scenario.controller().epoch(), epoch);
        }

        #[test]
        fn prop_mode_follows_signals(
            promote_after in 1u32..4,
            latencies in prop::collection::vec(latency_strategy(), 1..80),
        ) {
            let scenario = Scenario::new(single_sample_policy().with_promote_after(promote_after));
            let mut streak = 0u32;

            for latency in latencies {
                let before = scenario.mode();
                scenario.observe(sample(latency));
                let after = scenario.mode();

                match latency {
                    None => prop_assert_eq!(after, OffloadMode::Local),
                    Some(ms) if ms > 100 => prop_assert_eq!(after, OffloadMode::Local),
                    Some(ms) if ms < 50 => {
                        if before == OffloadMode::Local {
                            streak += 1;
                            let expected = if streak >= promote_after {
                                OffloadMode::Remote
                            } else {
                                OffloadMode::Local
                            };
                            prop_assert_eq!(after, expected);
                        } else {
                            prop_assert_eq!(after, OffloadMode::Remote);
                        }
                    }
                    Some(_) => prop_assert_eq!(after, before),
                }
                if after == OffloadMode::Remote || latency.map_or(true, |ms| ms >= 50) {
                    streak = 0;
                }
            }
        }
    }
}
