//! Observational hooks
//!
//! Components publish [`ResilienceEvent`]s to an [`EventSink`]. Sinks are
//! purely observational: they cannot fail and never affect control flow.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::duration_millis;
use crate::reliability::CircuitState;

/// Something worth recording happened inside the stack
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    /// A circuit breaker changed state
    StateChanged {
        breaker: String,
        from: CircuitState,
        to: CircuitState,
    },

    /// A protected call failed
    CallFailed { breaker: String, error: String },

    /// A protected call succeeded
    CallSucceeded { breaker: String },

    /// A call was rejected without being attempted
    CallRejected { breaker: String, state: CircuitState },

    /// A retry was scheduled after a failed attempt
    RetryScheduled {
        attempt: u32,
        #[serde(with = "duration_millis")]
        delay: Duration,
        error: String,
    },

    /// The limiter admitted a call without consulting its store
    RateLimitDegraded {
        limiter: String,
        key: String,
        error: String,
    },
}

/// Receiver of [`ResilienceEvent`]s
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ResilienceEvent);
}

/// Shared sink handle
pub type SharedEventSink = Arc<dyn EventSink>;

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::StateChanged { breaker, from, to } => {
                info!(breaker = %breaker, from = %from, to = %to, "Circuit breaker state changed");
            }
            ResilienceEvent::CallFailed { breaker, error } => {
                debug!(breaker = %breaker, error = %error, "Protected call failed");
            }
            ResilienceEvent::CallSucceeded { breaker } => {
                debug!(breaker = %breaker, "Protected call succeeded");
            }
            ResilienceEvent::CallRejected { breaker, state } => {
                debug!(breaker = %breaker, state = %state, "Call rejected by circuit breaker");
            }
            ResilienceEvent::RetryScheduled {
                attempt,
                delay,
                error,
            } => {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying"
                );
            }
            ResilienceEvent::RateLimitDegraded {
                limiter,
                key,
                error,
            } => {
                warn!(
                    limiter = %limiter,
                    key = %key,
                    error = %error,
                    "Counter store unavailable, admitting request (fail-open)"
                );
            }
        }
    }
}

/// Fan-out to several sinks
#[derive(Default, Clone)]
pub struct CompositeEventSink {
    sinks: Vec<SharedEventSink>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: SharedEventSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for CompositeEventSink {
    fn publish(&self, event: &ResilienceEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}

/// The default sink used when none is injected
pub fn tracing_sink() -> SharedEventSink {
    Arc::new(TracingEventSink)
}
