//! Offload controller
//!
//! Owns the one authoritative [`OffloadMode`] and the remote connection.
//! Every read-modify-write of the mode happens under a single mutex, so a
//! change is visible to the very next `infer` call and the pipeline never
//! sees a half-switched state.
//!
//! Each transition bumps an epoch. A probe remembers the epoch it started
//! in, and a promote derived from a probe whose epoch is stale is dropped:
//! a failure-triggered demotion that landed while the probe was in flight
//! always wins.

use std::collections::VecDeque;
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};

use handoff_backend::{InferenceBackend, RemoteConnector};
use handoff_core::{
    BackendError, HealthSample, HealthSignal, ModeTransition, MonitorConfig, OffloadMode, Pose,
    TransitionCause,
};

use crate::HysteresisPolicy;

/// Transitions kept for inspection
const TRANSITION_HISTORY: usize = 64;

/// Outcome of one `infer` call
#[derive(Clone, Debug, PartialEq)]
pub struct Inference {
    pub pose: Pose,
    /// Back end that produced `pose`
    pub mode: OffloadMode,
    /// Remote failure that made this frame run locally
    pub fallback: Option<BackendError>,
}

impl Inference {
    pub fn fell_back(&self) -> bool {
        self.fallback.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub remote_calls: u64,
    pub local_calls: u64,
    /// Remote failures retried on the local back end
    pub fallbacks: u64,
    pub local_failures: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub connections_opened: u64,
    /// Promotes dropped because a transition happened mid-probe
    pub stale_promotes: u64,
}

impl ControllerStats {
    pub fn transitions(&self) -> u64 {
        self.promotions + self.demotions
    }
}

struct RemoteSlot<R> {
    backend: Arc<R>,
    /// Distinguishes this connection from earlier ones
    generation: u64,
}

struct ControllerState<R> {
    mode: OffloadMode,
    epoch: u64,
    /// Present exactly while the mode is Remote
    remote: Option<RemoteSlot<R>>,
    next_generation: u64,
    /// Consecutive promote signals seen while Local
    healthy_streak: u32,
    closed: bool,
    history: VecDeque<ModeTransition>,
    stats: ControllerStats,
}

enum Route<R> {
    Local,
    Remote { backend: Arc<R>, generation: u64 },
}

/// Decides, per frame, whether inference runs locally or remotely
pub struct OffloadController<L, C: RemoteConnector> {
    local: L,
    connector: C,
    policy: HysteresisPolicy,
    state: Mutex<ControllerState<C::Backend>>,
    mode_tx: watch::Sender<OffloadMode>,
    /// `true` once closed. In-flight `infer` calls hold read guards.
    gate: RwLock<bool>,
}

impl<L: InferenceBackend, C: RemoteConnector> OffloadController<L, C> {
    /// Start in [`OffloadMode::INITIAL`] with a fresh remote back end
    pub fn new(local: L, connector: C, policy: HysteresisPolicy) -> Self {
        let mut stats = ControllerStats::default();
        let remote = if OffloadMode::INITIAL.is_remote() {
            stats.connections_opened += 1;
            Some(RemoteSlot {
                backend: Arc::new(connector.open()),
                generation: 1,
            })
        } else {
            None
        };

        let (mode_tx, _) = watch::channel(OffloadMode::INITIAL);

        OffloadController {
            local,
            connector,
            policy,
            state: Mutex::new(ControllerState {
                mode: OffloadMode::INITIAL,
                epoch: 0,
                remote,
                next_generation: 2,
                healthy_streak: 0,
                closed: false,
                history: VecDeque::with_capacity(TRANSITION_HISTORY),
                stats,
            }),
            mode_tx,
            gate: RwLock::new(false),
        }
    }

    pub fn from_config(local: L, connector: C, config: &MonitorConfig) -> Self {
        Self::new(local, connector, HysteresisPolicy::from_config(config))
    }

    /// Current mode
    pub fn mode(&self) -> OffloadMode {
        self.state.lock().mode
    }

    /// Number of transitions so far
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Generation of the live remote connection, if any
    pub fn remote_generation(&self) -> Option<u64> {
        self.state.lock().remote.as_ref().map(|slot| slot.generation)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Watch mode changes (display only)
    pub fn subscribe(&self) -> watch::Receiver<OffloadMode> {
        self.mode_tx.subscribe()
    }

    /// Most recent transitions, oldest first
    pub fn transitions(&self) -> Vec<ModeTransition> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> ControllerStats {
        self.state.lock().stats.clone()
    }

    pub fn policy(&self) -> &HysteresisPolicy {
        &self.policy
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    /// Run inference on `frame` with the active back end.
    ///
    /// A remote failure demotes to Local and retries the same frame locally,
    /// so only a failure of the local back end itself reaches the caller.
    pub async fn infer(&self, frame: &RgbImage) -> Result<Inference, BackendError> {
        let closed = self.gate.read().await;
        if *closed {
            return Err(BackendError::Unavailable("offload controller closed".into()));
        }

        let result = match self.route() {
            Route::Local => self.infer_local(frame).await.map(|pose| Inference {
                pose,
                mode: OffloadMode::Local,
                fallback: None,
            }),
            Route::Remote {
                backend,
                generation,
            } => {
                let outcome = backend.detect(frame).await;
                drop(backend);
                match outcome {
                    Ok(pose) => Ok(Inference {
                        pose,
                        mode: OffloadMode::Remote,
                        fallback: None,
                    }),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            kind = err.kind(),
                            generation,
                            "remote inference failed, retrying frame locally"
                        );
                        self.demote_after_failure(generation, err.clone());
                        self.infer_local(frame).await.map(|pose| Inference {
                            pose,
                            mode: OffloadMode::Local,
                            fallback: Some(err),
                        })
                    }
                }
            }
        };

        drop(closed);
        result
    }

    /// Feed one probe result, using the current epoch
    pub fn observe(&self, sample: &HealthSample) -> Option<ModeTransition> {
        let epoch = self.epoch();
        self.observe_since(sample, epoch)
    }

    /// Feed one probe result from a probe started at `probe_epoch`
    pub fn observe_since(&self, sample: &HealthSample, probe_epoch: u64) -> Option<ModeTransition> {
        let signal = self.policy.classify(sample);
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }

        match (signal, state.mode) {
            (Some(HealthSignal::Degrade), OffloadMode::Remote) => {
                let cause = HysteresisPolicy::cause(HealthSignal::Degrade, sample);
                Some(self.transition(&mut state, OffloadMode::Local, cause))
            }
            (Some(HealthSignal::Promote), OffloadMode::Local) => {
                if state.epoch != probe_epoch {
                    state.stats.stale_promotes += 1;
                    tracing::debug!(
                        probe_epoch,
                        epoch = state.epoch,
                        "promote from stale probe discarded"
                    );
                    return None;
                }

                state.healthy_streak += 1;
                if state.healthy_streak < self.policy.promote_after {
                    tracing::debug!(
                        streak = state.healthy_streak,
                        needed = self.policy.promote_after,
                        latency = ?sample.latency,
                        "promote pending confirmation"
                    );
                    return None;
                }

                let cause = HysteresisPolicy::cause(HealthSignal::Promote, sample);
                Some(self.transition(&mut state, OffloadMode::Remote, cause))
            }
            (Some(HealthSignal::Promote), OffloadMode::Remote) => None,
            (Some(HealthSignal::Degrade), OffloadMode::Local) | (None, _) => {
                state.healthy_streak = 0;
                None
            }
        }
    }

    /// Stop accepting frames, wait for in-flight calls, release the remote connection
    pub async fn close(&self) {
        // Write access waits for every in-flight `infer` to finish or time out
        let mut closed = self.gate.write().await;
        if *closed {
            return;
        }
        *closed = true;

        let remote = {
            let mut state = self.state.lock();
            state.closed = true;
            state.remote.take()
        };
        if let Some(slot) = remote {
            slot.backend.close().await;
        }
        self.local.close().await;

        tracing::info!("offload controller closed");
    }

    fn route(&self) -> Route<C::Backend> {
        let mut state = self.state.lock();
        let route = match (state.mode, state.remote.as_ref()) {
            (OffloadMode::Remote, Some(slot)) => Route::Remote {
                backend: Arc::clone(&slot.backend),
                generation: slot.generation,
            },
            _ => Route::Local,
        };
        if let Route::Remote { .. } = route {
            state.stats.remote_calls += 1;
        }
        route
    }

    async fn infer_local(&self, frame: &RgbImage) -> Result<Pose, BackendError> {
        let result = self.local.detect(frame).await;

        let mut state = self.state.lock();
        state.stats.local_calls += 1;
        if let Err(err) = &result {
            state.stats.local_failures += 1;
            tracing::error!(error = %err, "local inference failed");
        }
        result
    }

    fn demote_after_failure(&self, generation: u64, err: BackendError) -> Option<ModeTransition> {
        let mut state = self.state.lock();
        state.stats.fallbacks += 1;

        let live = state.remote.as_ref().map(|slot| slot.generation);
        if state.mode != OffloadMode::Remote || live != Some(generation) {
            // Already demoted, or the failed connection has been replaced
            tracing::debug!(generation, ?live, "remote failure from replaced connection ignored");
            return None;
        }

        Some(self.transition(
            &mut state,
            OffloadMode::Local,
            TransitionCause::BackendFailure(err),
        ))
    }

    fn transition(
        &self,
        state: &mut ControllerState<C::Backend>,
        to: OffloadMode,
        cause: TransitionCause,
    ) -> ModeTransition {
        let from = state.mode;
        state.mode = to;
        state.epoch += 1;
        state.healthy_streak = 0;

        match to {
            OffloadMode::Local => {
                // In-flight callers hold their own handle; the connection
                // goes away with the last one
                state.remote = None;
                state.stats.demotions += 1;
            }
            OffloadMode::Remote => {
                let generation = state.next_generation;
                state.next_generation += 1;
                state.remote = Some(RemoteSlot {
                    backend: Arc::new(self.connector.open()),
                    generation,
                });
                state.stats.connections_opened += 1;
                state.stats.promotions += 1;
            }
        }

        let transition = ModeTransition {
            from,
            to,
            cause,
            epoch: state.epoch,
        };
        if state.history.len() == TRANSITION_HISTORY {
            state.history.pop_front();
        }
        state.history.push_back(transition.clone());
        self.mode_tx.send_replace(to);

        tracing::info!(
            from = %from,
            to = %to,
            cause = %transition.cause,
            epoch = transition.epoch,
            "offload mode changed"
        );
        transition
    }
}
