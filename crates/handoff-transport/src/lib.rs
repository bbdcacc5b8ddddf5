//! handoff Transport Layer - TCP detect RPC and connectivity probing
//!
//! This crate provides:
//! - `RpcChannel`: client side of the detect RPC with connect/call timeouts
//! - `RpcServer`: accept loop serving detect requests with bounded concurrency
//! - `TcpProbe`: reachability/latency measurement against a fixed endpoint

pub mod probe;
pub mod rpc;
pub mod server;

pub use probe::*;
pub use rpc::*;
pub use server::*;
