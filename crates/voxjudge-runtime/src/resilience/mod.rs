//! Resilience patterns for voxjudge-runtime.
//!
//! This module provides:
//! - Retry with exponential backoff for transient provider errors
//! - Circuit breaker to stop calling a slot that keeps failing

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryOutcome, RetryPolicy};
