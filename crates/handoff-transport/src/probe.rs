//! Connectivity probe
//!
//! Measures TCP connect latency to a well-known reachable endpoint. The
//! endpoint is only a proxy for network health; nothing is sent over the
//! connection.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::timeout;

use handoff_core::HealthSample;

/// A source of network health measurements
pub trait Probe: Send + Sync {
    /// Take one measurement. Never fails; failures are `reachable: false`.
    fn probe(&self) -> impl Future<Output = HealthSample> + Send;
}

/// TCP connect probe with a short timeout
#[derive(Debug, Clone)]
pub struct TcpProbe {
    /// `host:port` to connect to
    target: String,
    /// Connect deadline
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        TcpProbe {
            target: target.into(),
            timeout,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Probe for TcpProbe {
    async fn probe(&self) -> HealthSample {
        let start = Instant::now();

        match timeout(self.timeout, TcpStream::connect(self.target.as_str())).await {
            Ok(Ok(stream)) => {
                let latency = start.elapsed();
                drop(stream);
                tracing::trace!(endpoint = %self.target, latency_ms = latency.as_millis() as u64, "probe ok");
                HealthSample::reachable(latency)
            }
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %self.target, error = %e, "probe connect failed");
                HealthSample::unreachable()
            }
            Err(_) => {
                tracing::debug!(endpoint = %self.target, "probe timed out");
                HealthSample::unreachable()
            }
        }
    }
}
