//! Shared fan-out fetch domain primitives.
//!
//! This crate owns the deterministic parts of the dispatch tree: request and
//! worker contracts, per-tree configuration, the backoff policy, outcome
//! accounting and partition planning. It intentionally excludes async runtime,
//! HTTP and AWS concerns, which live in `fanout_lambda`.

pub mod backoff;
pub mod config;
pub mod contract;
pub mod outcome;
pub mod partition;
