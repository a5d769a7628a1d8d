//! Async runtime for the recursive fan-out fetch engine.
//!
//! This crate owns runtime integration details (Lambda handlers, the fetch
//! transport and the worker dispatch channel) and exposes a single runtime
//! module boundary for contract, config, backoff, outcome and partition
//! primitives from `fanout_core`.

pub mod adapters;
pub mod handlers;
pub mod runtime;
pub mod telemetry;
