//! # Named failure-isolation boundaries.

mod breaker;

pub use breaker::{CircuitBreaker, CircuitConfig, CircuitState};
