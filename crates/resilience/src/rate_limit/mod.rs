//! Per-key sliding-window rate limiting
//!
//! This module provides:
//! - [`RateLimiter`] - Admits or rejects calls per key before they are attempted
//! - [`CounterStore`] - Optional shared storage for counters
//! - [`RateLimitPreset`] - Named quotas used across the platform

mod limiter;
mod store;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

pub use limiter::RateLimiter;
pub use store::{CounterStore, InMemoryCounterStore, StoreAdmission, StoreError};

/// Rate limiter configuration
///
/// # Example
///
/// ```
/// use juris_resilience::RateLimitConfig;
/// use std::time::Duration;
///
/// let config = RateLimitConfig::default()
///     .with_max_requests(3)
///     .with_window(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Length of the trailing window
    #[serde(with = "duration_millis")]
    pub window: Duration,

    /// Calls admitted per key inside one window
    pub max_requests: u32,

    /// First segment of shared store keys
    pub key_prefix: String,

    /// Local key count that triggers eviction during gc
    pub max_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 100,
            key_prefix: "ratelimit".to_string(),
            max_keys: 10_000,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub(crate) fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }
}

/// Named quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPreset {
    /// Sustained LLM provider traffic
    LlmProvider,
    /// Short LLM bursts
    LlmBurst,
    User,
    Agent,
    Api,
    Strict,
    /// Login and token endpoints
    Auth,
}

impl RateLimitPreset {
    pub const ALL: [RateLimitPreset; 7] = [
        Self::LlmProvider,
        Self::LlmBurst,
        Self::User,
        Self::Agent,
        Self::Api,
        Self::Strict,
        Self::Auth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LlmProvider => "llm_provider",
            Self::LlmBurst => "llm_burst",
            Self::User => "user",
            Self::Agent => "agent",
            Self::Api => "api",
            Self::Strict => "strict",
            Self::Auth => "auth",
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        let minute = Duration::from_secs(60);
        let (max_requests, window) = match self {
            Self::LlmProvider => (60, minute),
            Self::LlmBurst => (10, Duration::from_secs(1)),
            Self::User => (100, minute),
            Self::Agent => (200, minute),
            Self::Api => (1000, minute),
            Self::Strict => (10, minute),
            Self::Auth => (10, Duration::from_secs(15 * 60)),
        };
        RateLimitConfig::default()
            .with_max_requests(max_requests)
            .with_window(window)
    }
}

impl std::fmt::Display for RateLimitPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Calls counted in the current window, including this one if admitted
    pub used: u32,
    /// Epoch millis at which the oldest counted call leaves the window
    pub reset_at_ms: i64,
    /// Admitted without consulting the counter store
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Standard response headers
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at_ms.to_string()),
            ("X-RateLimit-Used", self.used.to_string()),
        ]
    }

    /// Milliseconds a rejected caller should wait, measured from `now_ms`
    pub fn retry_after_ms(&self, now_ms: i64) -> i64 {
        if self.allowed {
            0
        } else {
            (self.reset_at_ms - now_ms).max(0)
        }
    }
}
