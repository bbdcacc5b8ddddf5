//! handoff Wire Protocol - Binary frame format
//!
//! This crate implements the detect RPC wire contract:
//! - Fixed header (12 bytes)
//! - Request payload: one JPEG-encoded image
//! - Response payload: 63 little-endian f32 (21 landmarks × [x, y, z]) or a
//!   status-coded error detail
//!
//! A successful response whose 63 values are all exactly 0.0 encodes "no hand
//! detected"; failures always travel as a non-OK status.

pub mod frame;
pub mod header;
pub mod landmarks;

pub use frame::*;
pub use header::*;
pub use landmarks::*;
