//! Reliability patterns for calls to unreliable dependencies
//!
//! This module provides:
//! - [`TimeoutGuard`] - Bounds the wall-clock duration of an operation
//! - [`RetryPolicy`] / [`RetryExecutor`] - Retry with exponential backoff
//! - [`CircuitBreaker`] - Fail fast while a dependency is unhealthy
//! - [`CircuitBreakerRegistry`] - One breaker per dependency name

mod circuit_breaker;
mod registry;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use registry::CircuitBreakerRegistry;
pub use retry::{is_retryable, RetryExecutor, RetryPolicy, RetryPredicate, RetryStats};
pub use timeout::{bound, TimeoutGuard};
