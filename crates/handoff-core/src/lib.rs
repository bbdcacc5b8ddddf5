//! handoff Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every handoff component:
//! - Hand poses (21 normalized landmarks or an explicit absence)
//! - Offload mode (Local / Remote)
//! - Network health samples
//! - Backend and protocol errors
//! - Configuration

pub mod config;
pub mod error;
pub mod health;
pub mod mode;
pub mod pose;

pub use config::*;
pub use error::*;
pub use health::*;
pub use mode::*;
pub use pose::*;
