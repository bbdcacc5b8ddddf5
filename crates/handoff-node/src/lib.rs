//! handoff Node - frame sources and sinks for the client binary
//!
//! This crate provides:
//! - `DirectorySource`: JPEG/PNG frames read from a directory in name order
//! - `LogSink`: per-frame outcomes reported through `tracing`
//! - The `handoff-server` and `handoff-client` binaries

pub mod frames;

pub use frames::*;
