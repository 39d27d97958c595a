//! Library half of the reference host.
//!
//! The binary wires these together; integration tests use them directly.

pub mod config;
pub mod console;
