//! Sliding-window rate limiter

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::store::{CounterStore, StoreAdmission};
use super::{RateLimitConfig, RateLimitDecision, RateLimitPreset};
use crate::clock::{system_clock, SharedClock};
use crate::error::ResilienceError;
use crate::events::{tracing_sink, ResilienceEvent, SharedEventSink};

/// Request timestamps for one key, oldest first
#[derive(Debug, Default)]
struct KeyWindow {
    timestamps: VecDeque<i64>,
    last_seen_ms: i64,
}

impl KeyWindow {
    /// Timestamps equal to the cutoff are expired
    fn prune(&mut self, cutoff_ms: i64) {
        while self.timestamps.front().is_some_and(|ts| *ts <= cutoff_ms) {
            self.timestamps.pop_front();
        }
    }
}

/// Per-key sliding-window limiter
///
/// Counters live in process memory unless a [`CounterStore`] is attached.
/// With a store, an unreachable store admits the request (fail-open) and the
/// decision is flagged `degraded`.
///
/// # Example
///
/// ```
/// use juris_resilience::{RateLimitConfig, RateLimiter};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let limiter = RateLimiter::new(
///     "api",
///     RateLimitConfig::default().with_max_requests(2).with_window(Duration::from_secs(60)),
/// );
///
/// assert!(limiter.admit("ip:10.0.0.1").await.allowed);
/// assert!(limiter.admit("ip:10.0.0.1").await.allowed);
/// assert!(!limiter.admit("ip:10.0.0.1").await.allowed);
/// # });
/// ```
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    clock: SharedClock,
    events: SharedEventSink,
    local: DashMap<String, KeyWindow>,
    store: Option<Arc<dyn CounterStore>>,
    last_gc_ms: AtomicI64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("keys", &self.local.len())
            .field("shared_store", &self.store.is_some())
            .finish()
    }
}

impl RateLimiter {
    /// Create an in-process limiter
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            clock: system_clock(),
            events: tracing_sink(),
            local: DashMap::new(),
            store: None,
            last_gc_ms: AtomicI64::new(0),
        }
    }

    /// Create a limiter named after `preset` with its quota
    pub fn from_preset(preset: RateLimitPreset) -> Self {
        Self::new(preset.as_str(), preset.config())
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, sink: SharedEventSink) -> Self {
        self.events = sink;
        self
    }

    /// Keep counters in a shared store instead of process memory
    pub fn with_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Key used in the shared store
    pub fn store_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.config.key_prefix, self.name, key)
    }

    /// Admit or reject one call for `key`
    ///
    /// Rejected calls are not recorded.
    pub async fn admit(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();

        let decision = match &self.store {
            None => {
                self.maybe_gc(now);
                self.admit_local(key, now)
            }
            Some(store) => {
                let result = store
                    .admit(
                        &self.store_key(key),
                        now,
                        self.config.window,
                        self.config.max_requests,
                    )
                    .await;
                match result {
                    Ok(admission) => self.store_decision(admission, now),
                    Err(err) => self.fail_open(key, now, err.to_string()),
                }
            }
        };

        if !decision.allowed {
            debug!(
                limiter = %self.name,
                key = %key,
                used = decision.used,
                reset_at_ms = decision.reset_at_ms,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Admit `key` or fail with [`ResilienceError::RateLimited`]
    pub async fn check(&self, key: &str) -> Result<RateLimitDecision, ResilienceError> {
        let decision = self.admit(key).await;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(ResilienceError::RateLimited {
                key: key.to_string(),
                reset_at_ms: decision.reset_at_ms,
            })
        }
    }

    /// Report the state of `key` without consuming capacity
    pub async fn peek(&self, key: &str) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let cutoff = now - self.config.window_ms();

        let timestamps: Vec<i64> = match &self.store {
            None => self.local_timestamps(key),
            Some(store) => match store.get_window(&self.store_key(key), now).await {
                Ok(timestamps) => timestamps,
                Err(err) => {
                    warn!(limiter = %self.name, key = %key, error = %err, "Counter store unavailable during peek");
                    let mut decision = self.decide(0, None, now);
                    decision.degraded = true;
                    return decision;
                }
            },
        };

        let live: Vec<i64> = timestamps.into_iter().filter(|ts| *ts > cutoff).collect();
        let used = live.len() as u32;
        let mut decision = self.decide(used, live.first().copied(), now);
        decision.allowed = used < self.config.max_requests;
        decision
    }

    /// Forget all calls recorded for `key`
    pub async fn reset(&self, key: &str) {
        self.local.remove(key);
        if let Some(store) = &self.store {
            if let Err(err) = store.remove(&self.store_key(key)).await {
                warn!(limiter = %self.name, key = %key, error = %err, "Failed to reset key in counter store");
            }
        }
    }

    /// Forget every locally tracked key
    pub fn reset_all(&self) {
        self.local.clear();
    }

    /// Locally tracked keys
    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Drop idle keys and bound memory
    ///
    /// Keys not seen for a full window are removed. If more than `max_keys`
    /// remain, the least recently used fifth of `max_keys` is evicted.
    /// Returns the number of removed keys.
    ///
    /// [`admit`](Self::admit) runs this at most once per window, and whenever
    /// the key count exceeds `max_keys`.
    pub fn gc(&self) -> usize {
        let now = self.clock.now_ms();
        let cutoff = now - self.config.window_ms();
        let before = self.local.len();

        self.local.retain(|_, window| window.last_seen_ms > cutoff);

        if self.local.len() > self.config.max_keys {
            let mut by_age: Vec<(String, i64)> = self
                .local
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().last_seen_ms))
                .collect();
            by_age.sort_by_key(|(_, last_seen)| *last_seen);

            let evict = (self.config.max_keys / 5).max(1);
            for (key, _) in by_age.into_iter().take(evict) {
                self.local.remove(&key);
            }
        }

        let removed = before.saturating_sub(self.local.len());
        if removed > 0 {
            debug!(limiter = %self.name, removed, remaining = self.local.len(), "Rate limiter gc");
        }
        removed
    }

    /// Run [`gc`](Self::gc) every `interval` until `cancel` fires
    pub fn spawn_gc(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.gc();
                    }
                }
            }
        })
    }

    fn maybe_gc(&self, now: i64) {
        let last = self.last_gc_ms.load(Ordering::Acquire);
        let due = now - last >= self.config.window_ms() || self.local.len() > self.config.max_keys;
        if due
            && self
                .last_gc_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.gc();
        }
    }

    fn local_timestamps(&self, key: &str) -> Vec<i64> {
        self.local
            .get(key)
            .map(|window| window.timestamps.iter().copied().collect())
            .unwrap_or_default()
    }

    fn admit_local(&self, key: &str, now: i64) -> RateLimitDecision {
        let mut window = self.local.entry(key.to_string()).or_default();
        window.prune(now - self.config.window_ms());
        window.last_seen_ms = now;

        let count = window.timestamps.len() as u32;
        if count < self.config.max_requests {
            window.timestamps.push_back(now);
            self.decide(count + 1, window.timestamps.front().copied(), now)
        } else {
            let mut decision = self.decide(count, window.timestamps.front().copied(), now);
            decision.allowed = false;
            decision
        }
    }

    fn store_decision(&self, admission: StoreAdmission, now: i64) -> RateLimitDecision {
        let mut decision = self.decide(admission.count, admission.oldest_ms, now);
        decision.allowed = admission.allowed;
        decision
    }

    fn fail_open(&self, key: &str, now: i64, error: String) -> RateLimitDecision {
        self.events.publish(&ResilienceEvent::RateLimitDegraded {
            limiter: self.name.clone(),
            key: key.to_string(),
            error,
        });
        let mut decision = self.decide(1, None, now);
        decision.degraded = true;
        decision
    }

    fn decide(&self, used: u32, oldest_ms: Option<i64>, now: i64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(used),
            used,
            reset_at_ms: oldest_ms.unwrap_or(now) + self.config.window_ms(),
            degraded: false,
        }
    }
}
