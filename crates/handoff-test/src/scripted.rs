//! Scripted back ends and probes
//!
//! Deterministic stand-ins for the ONNX model, the RPC service and the
//! connectivity probe. Results are queued up front; once a queue runs dry
//! the configured default answers every further call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use parking_lot::Mutex;

use handoff_backend::{InferenceBackend, RemoteConnector};
use handoff_core::{BackendError, HandPose, HealthSample, Landmark, Pose, LANDMARK_COUNT};
use handoff_transport::Probe;

/// A hand with every landmark at `(x, x, 0)`
pub fn test_hand(x: f32) -> Pose {
    Pose::Hand(HandPose::new([Landmark::new(x, x, 0.0); LANDMARK_COUNT]))
}

/// Shared answers for one or more [`ScriptedBackend`]s
pub struct BackendScript {
    queue: Mutex<VecDeque<Result<Pose, BackendError>>>,
    default: Mutex<Result<Pose, BackendError>>,
    delay: Mutex<Duration>,
    calls: AtomicU64,
    closes: AtomicU64,
}

impl BackendScript {
    /// Every call answers `pose`
    pub fn answering(pose: Pose) -> Arc<Self> {
        Self::with_default(Ok(pose))
    }

    /// Every call fails with `err`
    pub fn failing(err: BackendError) -> Arc<Self> {
        Self::with_default(Err(err))
    }

    fn with_default(default: Result<Pose, BackendError>) -> Arc<Self> {
        Arc::new(BackendScript {
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(default),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        })
    }

    /// Queue one answer ahead of the default
    pub fn push(&self, result: Result<Pose, BackendError>) {
        self.queue.lock().push_back(result);
    }

    pub fn set_default(&self, result: Result<Pose, BackendError>) {
        *self.default.lock() = result;
    }

    /// Simulated inference time for every later call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    fn next(&self) -> Result<Pose, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.queue.lock().pop_front() {
            Some(result) => result,
            None => self.default.lock().clone(),
        }
    }
}

/// Back end that replays a [`BackendScript`]
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<BackendScript>,
}

impl ScriptedBackend {
    pub fn new(script: Arc<BackendScript>) -> Self {
        ScriptedBackend { script }
    }

    pub fn script(&self) -> &Arc<BackendScript> {
        &self.script
    }
}

impl InferenceBackend for ScriptedBackend {
    async fn detect(&self, _image: &RgbImage) -> Result<Pose, BackendError> {
        let delay = *self.script.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.next()
    }

    async fn close(&self) {
        self.script.closes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Opens [`ScriptedBackend`]s that all share one script
pub struct ScriptedConnector {
    script: Arc<BackendScript>,
    opened: AtomicU64,
}

impl ScriptedConnector {
    pub fn new(script: Arc<BackendScript>) -> Self {
        ScriptedConnector {
            script,
            opened: AtomicU64::new(0),
        }
    }

    /// Connections opened so far
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

impl RemoteConnector for ScriptedConnector {
    type Backend = ScriptedBackend;

    fn open(&self) -> ScriptedBackend {
        self.opened.fetch_add(1, Ordering::Relaxed);
        ScriptedBackend::new(Arc::clone(&self.script))
    }
}

/// Probe that replays a fixed list of samples, then a steady default
pub struct ScriptedProbe {
    samples: Mutex<VecDeque<HealthSample>>,
    default: HealthSample,
}

impl ScriptedProbe {
    pub fn new(samples: impl IntoIterator<Item = HealthSample>, default: HealthSample) -> Self {
        ScriptedProbe {
            samples: Mutex::new(samples.into_iter().collect()),
            default,
        }
    }

    /// Latencies in milliseconds; dead-zone 75ms once exhausted
    pub fn millis(values: &[u64]) -> Self {
        Self::new(
            values.iter().map(|ms| HealthSample::from_millis(*ms)),
            HealthSample::from_millis(75),
        )
    }

    pub fn remaining(&self) -> usize {
        self.samples.lock().len()
    }
}

impl Probe for ScriptedProbe {
    async fn probe(&self) -> HealthSample {
        match self.samples.lock().pop_front() {
            Some(sample) => sample,
            None => self.default.clone(),
        }
    }
}
