//! handoff Back Ends - where hand landmarks actually get computed
//!
//! This crate provides:
//! - `InferenceBackend`: the capability shared by every back end
//! - `LocalBackend`: in-process ONNX hand-landmark network
//! - `RemoteBackend` / `RpcConnector`: JPEG over the detect RPC
//! - `DetectionService`: server-side adapter from RPC requests to a back end

pub mod backend;
pub mod jpeg;
pub mod local;
pub mod remote;
pub mod service;

pub use backend::*;
pub use jpeg::*;
pub use local::*;
pub use remote::*;
pub use service::*;
