//! # Juris Resilience
//!
//! Fault-tolerance core for calling unreliable backends: circuit breaking,
//! rate limiting, retries with backoff, timeouts, and a coordinator that runs
//! a task against two backends under a configurable policy.
//!
//! ## Features
//!
//! - **Circuit breakers**: Fail fast while a dependency is unhealthy, probe it when it may have recovered
//! - **Sliding-window rate limiting**: Per-key quotas, optionally backed by a shared counter store
//! - **Automatic retries**: Exponential backoff with jitter and an error-kind based retry predicate
//! - **Timeouts**: Bound every attempt and every run, with cooperative cancellation
//! - **Two-backend coordination**: Single, fallback, sequential, and parallel policies with aggregate stats
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ExecutionCoordinator                      │
//! │      (applies the policy, merges results, records stats)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ per backend call
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RateLimiter → CircuitBreaker → RetryExecutor → TimeoutGuard │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BackendInvoker                          │
//! │          (traditional or graph-based implementation)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use juris_resilience::prelude::*;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let coordinator = ExecutionCoordinator::from_config(&ResilienceConfig::default());
//!
//! let traditional = FnInvoker::new("traditional", |task, _cancel| async move {
//!     Ok(json!({ "agent": task.agent_id }))
//! });
//! let graph = FnInvoker::new("graph", |_task, _cancel| async {
//!     Err(BackendError::http(503, "graph runtime unavailable"))
//! });
//!
//! let task = Task::new("monitor-djen", "user:42", json!({ "oab": "123456/SP" }));
//! let result = coordinator
//!     .run(&task, &traditional, &graph, CoordinationPolicy::Fallback, Duration::from_secs(5))
//!     .await;
//!
//! assert!(result.success);
//! assert_eq!(result.mode, "traditional");
//! # });
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod rate_limit;
pub mod reliability;

/// Prelude for common imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::{ConfigError, ResilienceConfig};
    pub use crate::coordinator::{
        AgentCatalog, BackendInvoker, CoordinationPolicy, CoordinationResult, CoordinatorConfig,
        ExecutionConfig, ExecutionCoordinator, ExecutionMode, FnInvoker, HybridOrchestrator,
        StatsRegistry, StatsSnapshot, Task,
    };
    pub use crate::error::{BackendError, ErrorKind, ResilienceError};
    pub use crate::events::{EventSink, ResilienceEvent, TracingEventSink};
    pub use crate::rate_limit::{
        CounterStore, InMemoryCounterStore, RateLimitConfig, RateLimitDecision, RateLimitPreset,
        RateLimiter,
    };
    pub use crate::reliability::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
        RetryExecutor, RetryPolicy, TimeoutGuard,
    };
    pub use async_trait::async_trait;
    pub use tokio_util::sync::CancellationToken;
}

// Re-export key types at crate root
pub use config::{ConfigError, ResilienceConfig};
pub use coordinator::{
    BackendInvoker, CoordinationPolicy, CoordinationResult, ExecutionCoordinator, HybridOrchestrator,
    StatsRegistry, Task,
};
pub use error::{BackendError, ErrorKind, ResilienceError};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use reliability::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, RetryExecutor,
    RetryPolicy, TimeoutGuard,
};
