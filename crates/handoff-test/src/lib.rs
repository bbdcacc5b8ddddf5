//! handoff Test Harness - simulation and validation of the offload controller
//!
//! This crate provides:
//! - Scripted back ends, connectors and probes
//! - Seeded latency simulation (good / poor / hostile links)
//! - Step-by-step controller scenarios
//! - End-to-end integration testing over loopback RPC

pub mod integration;
pub mod latency;
pub mod scenario;
pub mod scripted;

pub use integration::*;
pub use latency::*;
pub use scenario::*;
pub use scripted::*;
