//! Circuit breaker
//!
//! One [`CircuitBreaker`] guards one named dependency. State is kept behind a
//! single mutex so admission and outcome recording are atomic per call; the
//! lock is never held across an await.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::timeout::TimeoutGuard;
use crate::clock::{system_clock, SharedClock};
use crate::config::duration_millis;
use crate::error::ResilienceError;
use crate::events::{tracing_sink, ResilienceEvent, SharedEventSink};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Testing if service recovered - limited calls allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// Circuit breakers protect external services from cascading failures.
/// When failures exceed a threshold, the circuit "opens" and requests
/// fail fast without calling the service.
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure threshold  ┌─────────┐  open duration  ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ──────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘ ◄────────────── └──────────┘
///      ▲                                         any failure        │
///      │              success threshold                             │
///      └────────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```
/// use juris_resilience::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(5)
///     .with_open_duration(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// Consecutive successes required to close the circuit (in half-open state)
    pub success_threshold: u32,

    /// Time to wait before transitioning from open to half-open
    #[serde(with = "duration_millis")]
    pub open_duration: Duration,

    /// Bound on each protected call; a timeout counts as a failure
    ///
    /// When the breaker wraps a retry loop this bounds every attempt and
    /// backoff of the loop together, so it should be at least the attempt
    /// timeout times the number of attempts.
    #[serde(with = "duration_millis")]
    pub call_timeout: Duration,

    /// Concurrent probes admitted while half-open
    pub half_open_max_in_flight: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
            half_open_max_in_flight: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold to close the circuit
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn with_open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = duration;
        self
    }

    /// Set the per-call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the number of concurrent half-open probes
    pub fn with_half_open_max_in_flight(mut self, max: u32) -> Self {
        self.half_open_max_in_flight = max;
        self
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub half_open_in_flight: u32,
    /// Calls admitted past the breaker
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls refused without being attempted
    pub total_rejected: u64,
    pub last_failure_at_ms: Option<i64>,
    pub last_success_at_ms: Option<i64>,
    pub last_state_change_at_ms: i64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Bumped on every transition; outcomes from older generations are ignored
    generation: u64,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    last_state_change_at_ms: i64,
    last_failure_at_ms: Option<i64>,
    last_success_at_ms: Option<i64>,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejected: u64,
}

type Transition = (CircuitState, CircuitState);

impl Inner {
    fn new(now_ms: i64) -> Self {
        Self {
            state: CircuitState::Closed,
            generation: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            last_state_change_at_ms: now_ms,
            last_failure_at_ms: None,
            last_success_at_ms: None,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejected: 0,
        }
    }

    fn transition(&mut self, to: CircuitState, now_ms: i64) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
        self.last_state_change_at_ms = now_ms;
        (from != to).then_some((from, to))
    }

    fn open_remaining_ms(&self, open_duration: Duration, now_ms: i64) -> i64 {
        let elapsed = now_ms - self.last_state_change_at_ms;
        (open_duration.as_millis() as i64 - elapsed).max(0)
    }

    /// Lazy Open -> HalfOpen once the open duration has passed
    fn refresh(&mut self, open_duration: Duration, now_ms: i64) -> Option<Transition> {
        if self.state == CircuitState::Open && self.open_remaining_ms(open_duration, now_ms) == 0
        {
            self.transition(CircuitState::HalfOpen, now_ms)
        } else {
            None
        }
    }
}

enum Outcome<'e> {
    Success,
    Failure(&'e ResilienceError),
    Abandoned,
}

/// Admission ticket for one protected call
///
/// Dropping an unfinished permit releases its half-open slot without
/// recording an outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    finished: bool,
}

impl Permit<'_> {
    fn finish(mut self, outcome: Outcome<'_>) {
        self.finished = true;
        self.breaker.complete(self.generation, self.probe, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker
                .complete(self.generation, self.probe, Outcome::Abandoned);
        }
    }
}

/// In-process circuit breaker
///
/// # Example
///
/// ```
/// use juris_resilience::reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use juris_resilience::{BackendError, ResilienceError};
///
/// # tokio_test::block_on(async {
/// let breaker = CircuitBreaker::new(
///     "djen",
///     CircuitBreakerConfig::default().with_failure_threshold(1),
/// );
///
/// let _ = breaker
///     .execute(|| async { Err::<(), _>(BackendError::http(503, "down").into()) })
///     .await;
/// assert_eq!(breaker.state(), CircuitState::Open);
///
/// let rejected = breaker.execute(|| async { Ok::<_, ResilienceError>(()) }).await;
/// assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
/// # });
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    events: SharedEventSink,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.inner.lock().state)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a breaker using the system clock and tracing events
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_parts(name, config, system_clock(), tracing_sink())
    }

    /// Create a breaker with an injected clock and event sink
    pub fn with_parts(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
        events: SharedEventSink,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            name: name.into(),
            config,
            clock,
            events,
            inner: Mutex::new(Inner::new(now)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` through the breaker
    ///
    /// Rejected calls fail with [`ResilienceError::CircuitOpen`] without
    /// invoking `operation`. Admitted calls are bounded by the configured
    /// call timeout. Cancellation is not counted as a dependency failure.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let never = CancellationToken::new();
        self.execute_with_cancel(&never, |_| operation()).await
    }

    /// Run `operation` through the breaker with a cancellation token
    ///
    /// The operation receives a child of `parent` that is cancelled when the
    /// call timeout fires, so work it handed off is told to stop. Cancelling
    /// `parent` resolves to [`ResilienceError::Cancelled`].
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        parent: &CancellationToken,
        operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let permit = self.acquire()?;
        let result = TimeoutGuard::new(self.config.call_timeout)
            .bound_with_cancel(parent, operation)
            .await;

        match &result {
            Ok(_) => permit.finish(Outcome::Success),
            Err(ResilienceError::Cancelled) => permit.finish(Outcome::Abandoned),
            Err(err) => permit.finish(Outcome::Failure(err)),
        }
        result
    }

    /// Current state, applying a pending Open -> HalfOpen transition
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now_ms();
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.refresh(self.config.open_duration, now);
            (inner.state, transition)
        };
        self.publish_transition(transition);
        state
    }

    /// Remaining time before an open circuit starts probing
    pub fn retry_after(&self) -> Duration {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            Duration::from_millis(inner.open_remaining_ms(self.config.open_duration, now) as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Force the circuit closed with zeroed counters
    ///
    /// Lifetime totals are kept.
    pub fn reset(&self) {
        self.force_state(CircuitState::Closed);
    }

    /// Administrative override
    pub fn force_state(&self, state: CircuitState) {
        let now = self.clock.now_ms();
        let transition = self.inner.lock().transition(state, now);
        self.publish_transition(transition);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let now = self.clock.now_ms();
        let (stats, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.refresh(self.config.open_duration, now);
            let stats = CircuitBreakerStats {
                name: self.name.clone(),
                state: inner.state,
                consecutive_failures: inner.consecutive_failures,
                consecutive_successes: inner.consecutive_successes,
                half_open_in_flight: inner.half_open_in_flight,
                total_calls: inner.total_calls,
                total_successes: inner.total_successes,
                total_failures: inner.total_failures,
                total_rejected: inner.total_rejected,
                last_failure_at_ms: inner.last_failure_at_ms,
                last_success_at_ms: inner.last_success_at_ms,
                last_state_change_at_ms: inner.last_state_change_at_ms,
            };
            (stats, transition)
        };
        self.publish_transition(transition);
        stats
    }

    fn acquire(&self) -> Result<Permit<'_>, ResilienceError> {
        let now = self.clock.now_ms();
        let (admission, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.refresh(self.config.open_duration, now);

            let admission = match inner.state {
                CircuitState::Closed => Ok((inner.generation, false)),
                CircuitState::HalfOpen
                    if inner.half_open_in_flight < self.config.half_open_max_in_flight =>
                {
                    inner.half_open_in_flight += 1;
                    Ok((inner.generation, true))
                }
                CircuitState::HalfOpen => Err((CircuitState::HalfOpen, 0)),
                CircuitState::Open => Err((
                    CircuitState::Open,
                    inner.open_remaining_ms(self.config.open_duration, now),
                )),
            };

            match admission {
                Ok(_) => inner.total_calls += 1,
                Err(_) => inner.total_rejected += 1,
            }
            (admission, transition)
        };
        self.publish_transition(transition);

        match admission {
            Ok((generation, probe)) => Ok(Permit {
                breaker: self,
                generation,
                probe,
                finished: false,
            }),
            Err((state, remaining_ms)) => {
                self.events.publish(&ResilienceEvent::CallRejected {
                    breaker: self.name.clone(),
                    state,
                });
                Err(ResilienceError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after: Duration::from_millis(remaining_ms as u64),
                })
            }
        }
    }

    fn complete(&self, generation: u64, probe: bool, outcome: Outcome<'_>) {
        let now = self.clock.now_ms();
        let transition = {
            let mut inner = self.inner.lock();
            let current = inner.generation == generation;

            if probe && current {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }

            match outcome {
                Outcome::Abandoned => None,
                Outcome::Success => {
                    inner.total_successes += 1;
                    inner.last_success_at_ms = Some(now);
                    if !current {
                        None
                    } else {
                        inner.consecutive_successes += 1;
                        inner.consecutive_failures = 0;
                        if inner.state == CircuitState::HalfOpen
                            && inner.consecutive_successes >= self.config.success_threshold
                        {
                            inner.transition(CircuitState::Closed, now)
                        } else {
                            None
                        }
                    }
                }
                Outcome::Failure(_) => {
                    inner.total_failures += 1;
                    inner.last_failure_at_ms = Some(now);
                    if !current {
                        None
                    } else {
                        inner.consecutive_failures += 1;
                        inner.consecutive_successes = 0;
                        match inner.state {
                            CircuitState::HalfOpen => inner.transition(CircuitState::Open, now),
                            CircuitState::Closed
                                if inner.consecutive_failures >= self.config.failure_threshold =>
                            {
                                inner.transition(CircuitState::Open, now)
                            }
                            _ => None,
                        }
                    }
                }
            }
        };

        match outcome {
            Outcome::Success => self.events.publish(&ResilienceEvent::CallSucceeded {
                breaker: self.name.clone(),
            }),
            Outcome::Failure(err) => self.events.publish(&ResilienceEvent::CallFailed {
                breaker: self.name.clone(),
                error: err.to_string(),
            }),
            Outcome::Abandoned => {}
        }
        self.publish_transition(transition);
    }

    fn publish_transition(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            self.events.publish(&ResilienceEvent::StateChanged {
                breaker: self.name.clone(),
                from,
                to,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::BackendError;
    use crate::events::EventSink;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ResilienceEvent>>);

    impl EventSink for Collect {
        fn publish(&self, event: &ResilienceEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new(0);
        let breaker =
            CircuitBreaker::with_parts("test", config, Arc::new(clock.clone()), tracing_sink());
        (breaker, clock)
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), ResilienceError> {
        breaker
            .execute(|| async { Err(BackendError::network("reset").into()) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), ResilienceError> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.open_duration, Duration::from_secs(30));
        assert_eq!(config.half_open_max_in_flight, 3);
    }

    #[test]
    fn test_config_builder() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(10)
            .with_success_threshold(3)
            .with_open_duration(Duration::from_secs(60))
            .with_call_timeout(Duration::from_secs(5))
            .with_half_open_max_in_flight(1);

        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.open_duration, Duration::from_secs(60));
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.half_open_max_in_flight, 1);
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[test]
    fn test_serialization() {
        let config = CircuitBreakerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CircuitBreakerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_short_circuits() {
        let (breaker, _clock) = breaker(CircuitBreakerConfig::new().with_failure_threshold(3));

        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(ResilienceError::Backend(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError>(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.stats().total_rejected, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let (breaker, _clock) = breaker(CircuitBreakerConfig::new().with_failure_threshold(3));

        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_retry_after_counts_down() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_open_duration(Duration::from_secs(10)),
        );
        fail(&breaker).await.unwrap_err();

        clock.advance(Duration::from_secs(4));
        assert_eq!(breaker.retry_after(), Duration::from_secs(6));

        match succeed(&breaker).await {
            Err(ResilienceError::CircuitOpen { name, retry_after }) => {
                assert_eq!(name, "test");
                assert_eq!(retry_after, Duration::from_secs(6));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transitions_to_half_open_lazily() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_open_duration(Duration::from_secs(10)),
        );
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(1));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.retry_after(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_half_open_admits_limited_probes() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_half_open_max_in_flight(2)
                .with_open_duration(Duration::from_secs(1)),
        );
        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(1));

        let first = breaker.acquire().unwrap();
        let second = breaker.acquire().unwrap();
        assert!(matches!(
            breaker.acquire(),
            Err(ResilienceError::CircuitOpen { .. })
        ));
        assert_eq!(breaker.stats().half_open_in_flight, 2);

        drop(first);
        assert_eq!(breaker.stats().half_open_in_flight, 1);
        let third = breaker.acquire().unwrap();

        second.finish(Outcome::Success);
        third.finish(Outcome::Success);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_recovery_resets_counters() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(2)
                .with_success_threshold(2)
                .with_open_duration(Duration::from_secs(5)),
        );
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(5));

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.consecutive_successes, 0);
        assert_eq!(stats.half_open_in_flight, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_success_threshold(3)
                .with_open_duration(Duration::from_secs(5)),
        );
        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(5));

        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.retry_after(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stale_generation_outcome_only_updates_totals() {
        let (breaker, _clock) = breaker(CircuitBreakerConfig::new().with_failure_threshold(1));

        let slow = breaker.acquire().unwrap();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        slow.finish(Outcome::Failure(&ResilienceError::Cancelled));

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.total_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_failure() {
        let (breaker, _clock) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_call_timeout(Duration::from_millis(100)),
        );

        let result = breaker
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ResilienceError>(())
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_cancels_handed_off_work() {
        let (breaker, _clock) = breaker(
            CircuitBreakerConfig::new().with_call_timeout(Duration::from_millis(50)),
        );
        let (tx, rx) = tokio::sync::oneshot::channel();

        let result = breaker
            .execute_with_cancel(&CancellationToken::new(), |token| async move {
                tokio::spawn(async move {
                    token.cancelled().await;
                    let _ = tx.send(());
                });
                std::future::pending::<Result<(), ResilienceError>>().await
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
        let signalled = tokio::time::timeout(Duration::from_millis(200), rx).await;
        assert!(matches!(signalled, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_parent_cancellation_is_abandoned() {
        let (breaker, _clock) = breaker(CircuitBreakerConfig::new().with_failure_threshold(1));
        let parent = CancellationToken::new();
        parent.cancel();

        let result = breaker
            .execute_with_cancel(&parent, |_| async { Ok::<_, ResilienceError>(()) })
            .await;

        assert_eq!(result.unwrap_err(), ResilienceError::Cancelled);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().total_failures, 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_a_failure() {
        let (breaker, _clock) = breaker(CircuitBreakerConfig::new().with_failure_threshold(1));

        let result: Result<(), _> = breaker
            .execute(|| async { Err(ResilienceError::Cancelled) })
            .await;

        assert_eq!(result.unwrap_err(), ResilienceError::Cancelled);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().total_failures, 0);
    }

    #[tokio::test]
    async fn test_dropped_call_releases_probe_slot() {
        let (breaker, clock) = breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(1)
                .with_half_open_max_in_flight(1)
                .with_open_duration(Duration::from_secs(1)),
        );
        fail(&breaker).await.unwrap_err();
        clock.advance(Duration::from_secs(1));

        let pending = breaker.execute(|| std::future::pending::<Result<(), ResilienceError>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        assert_eq!(breaker.stats().half_open_in_flight, 0);
        succeed(&breaker).await.unwrap();
    }

    #[tokio::test]
    async fn test_force_state_and_events() {
        let sink = Arc::new(Collect::default());
        let breaker = CircuitBreaker::with_parts(
            "llm",
            CircuitBreakerConfig::default(),
            Arc::new(ManualClock::new(0)),
            sink.clone(),
        );

        breaker.force_state(CircuitState::Open);
        assert!(matches!(
            succeed(&breaker).await,
            Err(ResilienceError::CircuitOpen { .. })
        ));
        breaker.reset();

        let events = sink.0.lock().clone();
        assert_eq!(
            events,
            vec![
                ResilienceEvent::StateChanged {
                    breaker: "llm".into(),
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                },
                ResilienceEvent::CallRejected {
                    breaker: "llm".into(),
                    state: CircuitState::Open,
                },
                ResilienceEvent::StateChanged {
                    breaker: "llm".into(),
                    from: CircuitState::Open,
                    to: CircuitState::Closed,
                },
            ]
        );
    }
}
