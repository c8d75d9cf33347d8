//! Aggregate configuration
//!
//! [`ResilienceConfig`] bundles the settings of every component and can be
//! loaded from the environment. Component configs keep their own builders;
//! this module only wires them together.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::{CoordinationPolicy, CoordinatorConfig};
use crate::rate_limit::RateLimitConfig;
use crate::reliability::{CircuitBreakerConfig, RetryPolicy};

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A setting is out of range or inconsistent with another
    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Settings for the whole protection stack
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResilienceConfig {
    /// Defaults applied to every circuit breaker created by the registry
    pub breaker: CircuitBreakerConfig,

    /// Whether backend calls pass through the rate limiter
    pub rate_limiting: bool,

    /// Rate limiter window and quota
    pub rate_limit: RateLimitConfig,

    /// Retry policy for backend calls
    pub retry: RetryPolicy,

    /// Coordinator timeouts and default policy
    pub coordinator: CoordinatorConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            rate_limiting: true,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables (all optional, unparseable values are ignored):
    /// - `JURIS_BREAKER_FAILURE_THRESHOLD`, `JURIS_BREAKER_SUCCESS_THRESHOLD`
    /// - `JURIS_BREAKER_OPEN_MS`, `JURIS_BREAKER_CALL_TIMEOUT_MS`, `JURIS_BREAKER_HALF_OPEN_MAX`
    /// - `JURIS_RATE_LIMIT_ENABLED`, `JURIS_RATE_LIMIT_WINDOW_MS`,
    ///   `JURIS_RATE_LIMIT_MAX_REQUESTS`, `JURIS_RATE_LIMIT_PREFIX`
    /// - `JURIS_RETRY_MAX_ATTEMPTS`, `JURIS_RETRY_BASE_DELAY_MS`, `JURIS_RETRY_MAX_DELAY_MS`,
    ///   `JURIS_RETRY_BACKOFF_FACTOR`, `JURIS_RETRY_JITTER`
    /// - `JURIS_ATTEMPT_TIMEOUT_MS`, `JURIS_RUN_TIMEOUT_MS`, `JURIS_POLICY`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let breaker = &mut config.breaker;
        if let Some(v) = env_parse("JURIS_BREAKER_FAILURE_THRESHOLD") {
            breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse("JURIS_BREAKER_SUCCESS_THRESHOLD") {
            breaker.success_threshold = v;
        }
        if let Some(v) = env_millis("JURIS_BREAKER_OPEN_MS") {
            breaker.open_duration = v;
        }
        if let Some(v) = env_millis("JURIS_BREAKER_CALL_TIMEOUT_MS") {
            breaker.call_timeout = v;
        }
        if let Some(v) = env_parse("JURIS_BREAKER_HALF_OPEN_MAX") {
            breaker.half_open_max_in_flight = v;
        }

        if let Ok(v) = env::var("JURIS_RATE_LIMIT_ENABLED") {
            config.rate_limiting = v.eq_ignore_ascii_case("true") || v == "1";
        }
        let limit = &mut config.rate_limit;
        if let Some(v) = env_millis("JURIS_RATE_LIMIT_WINDOW_MS") {
            limit.window = v;
        }
        if let Some(v) = env_parse("JURIS_RATE_LIMIT_MAX_REQUESTS") {
            limit.max_requests = v;
        }
        if let Ok(v) = env::var("JURIS_RATE_LIMIT_PREFIX") {
            if !v.is_empty() {
                limit.key_prefix = v;
            }
        }

        let retry = &mut config.retry;
        if let Some(v) = env_parse("JURIS_RETRY_MAX_ATTEMPTS") {
            retry.max_attempts = v;
        }
        if let Some(v) = env_millis("JURIS_RETRY_BASE_DELAY_MS") {
            retry.initial_interval = v;
        }
        if let Some(v) = env_millis("JURIS_RETRY_MAX_DELAY_MS") {
            retry.max_interval = v;
        }
        if let Some(v) = env_parse("JURIS_RETRY_BACKOFF_FACTOR") {
            retry.backoff_coefficient = v;
        }
        if let Some(v) = env_parse::<f64>("JURIS_RETRY_JITTER") {
            retry.jitter = v.clamp(0.0, 1.0);
        }

        let coordinator = &mut config.coordinator;
        if let Some(v) = env_millis("JURIS_ATTEMPT_TIMEOUT_MS") {
            coordinator.attempt_timeout = v;
        }
        if let Some(v) = env_millis("JURIS_RUN_TIMEOUT_MS") {
            coordinator.run_timeout = v;
        }
        if let Some(v) = env_parse::<CoordinationPolicy>("JURIS_POLICY") {
            coordinator.default_policy = v;
        }

        config
    }

    /// Reject settings that would make a component misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(ConfigError::invalid("breaker.success_threshold", "must be at least 1"));
        }
        if self.breaker.half_open_max_in_flight == 0 {
            return Err(ConfigError::invalid(
                "breaker.half_open_max_in_flight",
                "must be at least 1",
            ));
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::invalid("rate_limit.window", "must be non-zero"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::invalid("rate_limit.max_requests", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.max_interval < self.retry.initial_interval {
            return Err(ConfigError::invalid(
                "retry.max_interval",
                "must not be shorter than retry.initial_interval",
            ));
        }
        if self.retry.backoff_coefficient < 1.0 {
            return Err(ConfigError::invalid("retry.backoff_coefficient", "must be >= 1.0"));
        }
        if self.coordinator.run_timeout.is_zero() {
            return Err(ConfigError::invalid("coordinator.run_timeout", "must be non-zero"));
        }
        // The breaker call bounds the whole retry loop of one backend
        if self.breaker.call_timeout < self.coordinator.attempt_timeout * self.retry.max_attempts {
            return Err(ConfigError::invalid(
                "breaker.call_timeout",
                "must cover retry.max_attempts attempts of coordinator.attempt_timeout",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
