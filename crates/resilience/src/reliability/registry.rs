//! Named circuit breakers
//!
//! Build one [`CircuitBreakerRegistry`] at startup and share it by `Arc`.
//! Every lookup of the same name returns the same breaker.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::clock::{system_clock, SharedClock};
use crate::error::ResilienceError;
use crate::events::{tracing_sink, SharedEventSink};

/// Process-wide map of breakers keyed by dependency name
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    clock: SharedClock,
    events: SharedEventSink,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use `defaults` unless told otherwise
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            clock: system_clock(),
            events: tracing_sink(),
            breakers: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, sink: SharedEventSink) -> Self {
        self.events = sink;
        self
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Get the breaker for `name`, creating it with the default config
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.defaults.clone())
    }

    /// Get the breaker for `name`, creating it with `config`
    ///
    /// `config` is ignored when the breaker already exists.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_parts(
                    name,
                    config,
                    self.clock.clone(),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Stats for every breaker, sorted by name
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        let mut stats: Vec<CircuitBreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Run `operation` through the breaker `name`, using `fallback` only
    /// when the breaker refuses the call
    ///
    /// Failures of `operation` itself are returned as-is.
    pub async fn with_fallback<T, F, Fut, G, GFut>(
        &self,
        name: &str,
        operation: F,
        fallback: G,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, ResilienceError>>,
    {
        let breaker = self.get_or_create(name);
        match breaker.execute(operation).await {
            Err(ResilienceError::CircuitOpen { .. }) => fallback().await,
            other => other,
        }
    }
}
