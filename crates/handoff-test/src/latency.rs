//! Simulated network latency
//!
//! Seeded generators of probe results for good, poor and hostile links.
//! Same seed, same sequence.

use std::time::Duration;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use handoff_core::HealthSample;
use handoff_transport::Probe;
use parking_lot::Mutex;

/// Jitter distribution type
#[derive(Clone, Debug)]
pub enum JitterDistribution {
    /// Uniform distribution
    Uniform { min_ms: u32, max_ms: u32 },
    /// Normal distribution (mean, stddev)
    Normal { mean_ms: f64, stddev_ms: f64 },
    /// Pareto distribution (heavy tail)
    Pareto { scale_ms: f64, shape: f64 },
}

impl JitterDistribution {
    /// Sample a jitter value
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            JitterDistribution::Uniform { min_ms, max_ms } => {
                let dist = Uniform::new_inclusive(*min_ms, *max_ms);
                Duration::from_millis(dist.sample(rng) as u64)
            }
            JitterDistribution::Normal { mean_ms, stddev_ms } => {
                // Box-Muller
                let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
                let u2: f64 = rng.gen();
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                let value = mean_ms + stddev_ms * z;
                Duration::from_millis(value.max(0.0) as u64)
            }
            JitterDistribution::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                let value = scale_ms / u.powf(1.0 / shape);
                // Cap at one probe timeout
                Duration::from_millis(value.min(2000.0) as u64)
            }
        }
    }
}

/// Link conditions seen by the connectivity probe
#[derive(Clone, Debug)]
pub struct LatencyProfile {
    /// Base round-trip latency
    pub base_latency: Duration,
    pub jitter: JitterDistribution,
    /// Probability a probe gets no answer at all
    pub unreachable_rate: f64,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        LatencyProfile {
            base_latency: Duration::from_millis(50),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 50,
            },
            unreachable_rate: 0.01,
        }
    }
}

impl LatencyProfile {
    /// Wired or good Wi-Fi; always under the promote threshold
    pub fn good() -> Self {
        LatencyProfile {
            base_latency: Duration::from_millis(20),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 10,
            },
            unreachable_rate: 0.0,
        }
    }

    /// Congested mobile link hovering around both thresholds
    pub fn poor() -> Self {
        LatencyProfile {
            base_latency: Duration::from_millis(60),
            jitter: JitterDistribution::Pareto {
                scale_ms: 15.0,
                shape: 1.5,
            },
            unreachable_rate: 0.05,
        }
    }

    /// 2G-class link with frequent outages
    pub fn hostile() -> Self {
        LatencyProfile {
            base_latency: Duration::from_millis(200),
            jitter: JitterDistribution::Pareto {
                scale_ms: 100.0,
                shape: 1.2,
            },
            unreachable_rate: 0.15,
        }
    }
}

/// Deterministic stream of probe results for a [`LatencyProfile`]
pub struct LatencySimulator {
    profile: LatencyProfile,
    rng: StdRng,
    stats: LatencyStats,
}

#[derive(Clone, Debug, Default)]
pub struct LatencyStats {
    pub samples: u64,
    pub unreachable: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl LatencyStats {
    pub fn unreachable_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.unreachable as f64 / self.samples as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let reachable = self.samples - self.unreachable;
        if reachable == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / reachable as f64
        }
    }
}

impl LatencySimulator {
    pub fn new(profile: LatencyProfile, seed: u64) -> Self {
        LatencySimulator {
            profile,
            rng: StdRng::seed_from_u64(seed),
            stats: LatencyStats::default(),
        }
    }

    /// Draw the next probe result
    pub fn next_sample(&mut self) -> HealthSample {
        self.stats.samples += 1;

        if self.rng.gen::<f64>() < self.profile.unreachable_rate {
            self.stats.unreachable += 1;
            return HealthSample::unreachable();
        }

        let latency = self.profile.base_latency + self.profile.jitter.sample(&mut self.rng);
        let ms = latency.as_millis() as u64;
        self.stats.total_latency_ms += ms;
        self.stats.max_latency_ms = self.stats.max_latency_ms.max(ms);
        HealthSample::reachable(latency)
    }

    /// The next `n` probe results
    pub fn take(&mut self, n: usize) -> Vec<HealthSample> {
        (0..n).map(|_| self.next_sample()).collect()
    }

    pub fn stats(&self) -> &LatencyStats {
        &self.stats
    }

    /// Wrap into a [`Probe`] for the health monitor
    pub fn into_probe(self) -> SimulatedProbe {
        SimulatedProbe(Mutex::new(self))
    }
}

/// A [`LatencySimulator`] behind the probe interface
pub struct SimulatedProbe(Mutex<LatencySimulator>);

impl SimulatedProbe {
    pub fn stats(&self) -> LatencyStats {
        self.0.lock().stats.clone()
    }
}

impl Probe for SimulatedProbe {
    async fn probe(&self) -> HealthSample {
        self.0.lock().next_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_samples() {
        let a: Vec<_> = LatencySimulator::new(LatencyProfile::poor(), 7)
            .take(50)
            .into_iter()
            .map(|s| s.latency)
            .collect();
        let b: Vec<_> = LatencySimulator::new(LatencyProfile::poor(), 7)
            .take(50)
            .into_iter()
            .map(|s| s.latency)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_good_link_stays_fast() {
        let mut sim = LatencySimulator::new(LatencyProfile::good(), 1);
        for sample in sim.take(500) {
            assert!(sample.reachable);
            assert!(sample.latency.unwrap() <= Duration::from_millis(30));
        }
        assert_eq!(sim.stats().unreachable, 0);
    }

    #[test]
    fn test_hostile_link_drops_probes() {
        let mut sim = LatencySimulator::new(LatencyProfile::hostile(), 12345);
        sim.take(1000);

        let stats = sim.stats();
        assert!(stats.unreachable_rate() > 0.05);
        assert!(stats.avg_latency_ms() > 200.0);
    }

    #[test]
    fn test_pareto_has_heavy_tail() {
        let mut rng = StdRng::seed_from_u64(42);
        let pareto = JitterDistribution::Pareto {
            scale_ms: 50.0,
            shape: 1.5,
        };

        let samples: Vec<u128> = (0..1000).map(|_| pareto.sample(&mut rng).as_millis()).collect();
        let avg = samples.iter().sum::<u128>() / 1000;
        let max = samples.iter().copied().max().unwrap();
        assert!(max > avg * 2);
    }

    #[test]
    fn test_normal_jitter_never_negative() {
        let mut rng = StdRng::seed_from_u64(3);
        let normal = JitterDistribution::Normal {
            mean_ms: 5.0,
            stddev_ms: 20.0,
        };
        // Duration cannot be negative; large deviations clamp to zero
        let zeros = (0..1000).filter(|_| normal.sample(&mut rng).is_zero()).count();
        assert!(zeros > 0);
    }
}
