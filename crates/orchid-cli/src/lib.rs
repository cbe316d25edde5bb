//! Command implementations behind the `orchid` binary.
//!
//! Split into a library crate so the integration tests can drive the
//! exact code paths the binary runs.

pub mod channel;
pub mod commands;
