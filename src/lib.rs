//! Gatehouse - Process-local Request-Rate Gate
//!
//! This crate limits how often a caller may invoke a protected endpoint
//! within a fixed time window. Counters live in memory, are keyed by caller
//! address and target path, and expire lazily.
//!
//! The core lives in [`ratelimit`]; [`http`] hosts it as axum middleware and a
//! forward-auth endpoint.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
