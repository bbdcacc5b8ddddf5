//! handoff Runtime - adaptive offload between local and remote inference
//!
//! This crate provides:
//! - `OffloadController`: owns the active mode and dispatches every frame
//! - `HysteresisPolicy`: classifies health samples with a dead zone
//! - `NetworkHealthMonitor`: rate-limited probe loop feeding the controller
//! - `PipelineLoop`: frame source → preprocess → infer → sink
//! - `MetricsCollector` / `PerformanceReport`: resource sampling and summary
//! - `OffloadRuntime`: starts the background tasks and shuts them down in order

pub mod controller;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod policy;
pub mod runtime;
pub mod telemetry;

pub use controller::*;
pub use metrics::*;
pub use monitor::*;
pub use pipeline::*;
pub use policy::*;
pub use runtime::*;
pub use telemetry::*;
