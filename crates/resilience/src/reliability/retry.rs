//! Retry policy and executor

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::config::duration_millis;
use crate::error::ResilienceError;
use crate::events::{tracing_sink, ResilienceEvent, SharedEventSink};

/// Configuration for retries
///
/// Supports exponential backoff with jitter to avoid thundering herd.
///
/// # Example
///
/// ```
/// use juris_resilience::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_millis(100))
///     .with_max_interval(Duration::from_secs(2));
///
/// // First retry after ~100ms
/// // Second retry after ~200ms
/// // Third retry after ~400ms
/// // etc.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0) to add randomness
    ///
    /// A value of 0.25 means ±25% randomness. Zero disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy with sensible defaults
    ///
    /// - 3 max attempts
    /// - 1 second initial interval
    /// - 30 second max interval
    /// - 2x backoff coefficient
    /// - 25% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            backoff_coefficient: 2.0,
            jitter: 0.25,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Generic external HTTP APIs
    pub fn external_api() -> Self {
        Self::exponential().with_max_interval(Duration::from_secs(10))
    }

    /// Judicial publication search; the upstream dislikes bursts, so no jitter
    pub fn judicial_publications() -> Self {
        Self {
            max_attempts: 2,
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(15),
            backoff_coefficient: 2.0,
            jitter: 0.0,
        }
    }

    /// LLM provider calls
    pub fn llm_provider() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            backoff_coefficient: 1.5,
            jitter: 0.25,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Disable jitter
    pub fn without_jitter(self) -> Self {
        self.with_jitter(0.0)
    }

    /// Delay before `attempt` (1-based) without jitter
    ///
    /// Attempt 1 has no delay; attempt 2 waits `initial_interval`, and each
    /// later attempt multiplies by `backoff_coefficient`, capped at
    /// `max_interval`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1; // First retry is after attempt 1
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Calculate delay for a given attempt number (1-based)
    ///
    /// Returns the duration to wait before the attempt, jittered if enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for_attempt(attempt).as_secs_f64();

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..=jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Decides whether a failure is worth another attempt
pub type RetryPredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Default classification
///
/// Retries transient backend kinds (network, timeout, 5xx, rate-limit
/// signals) and guard timeouts. Open circuits, local quota rejections,
/// cancellations and everything else fail fast.
pub fn is_retryable(error: &ResilienceError) -> bool {
    match error {
        ResilienceError::Backend(err) => err.kind.is_transient(),
        ResilienceError::Timeout { .. } => true,
        ResilienceError::CircuitOpen { .. }
        | ResilienceError::RateLimited { .. }
        | ResilienceError::Cancelled
        | ResilienceError::RetriesExhausted { .. }
        | ResilienceError::AllBackendsFailed { .. } => false,
    }
}

/// What happened during an [`RetryExecutor::execute_with_stats`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RetryStats {
    /// Attempts made, including the successful one
    pub attempts: u32,

    /// Time spent sleeping between attempts
    #[serde(with = "duration_millis")]
    pub total_delay: Duration,
}

/// Runs an operation until it succeeds or the policy gives up
///
/// # Example
///
/// ```
/// use juris_resilience::reliability::{RetryExecutor, RetryPolicy};
/// use juris_resilience::{BackendError, ResilienceError};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let executor = RetryExecutor::new(
///     RetryPolicy::fixed(Duration::from_millis(1), 3),
/// );
/// let result = executor
///     .execute(|attempt| async move {
///         if attempt < 3 {
///             Err(BackendError::network("connection reset").into())
///         } else {
///             Ok::<_, ResilienceError>(attempt)
///         }
///     })
///     .await;
/// assert_eq!(result.unwrap(), 3);
/// # });
/// ```
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    predicate: RetryPredicate,
    events: SharedEventSink,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Create an executor using the default retry predicate
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            predicate: Arc::new(is_retryable),
            events: tracing_sink(),
        }
    }

    /// Replace the retry predicate
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ResilienceError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Publish retry events to `sink`
    pub fn with_event_sink(mut self, sink: SharedEventSink) -> Self {
        self.events = sink;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` with retries
    ///
    /// The operation receives the 1-based attempt number. Failures are
    /// returned as [`ResilienceError::RetriesExhausted`].
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let never = CancellationToken::new();
        self.execute_with_stats(&never, operation).await.0
    }

    /// Run `operation` with retries, stopping early when `cancel` fires
    pub async fn execute_cancellable<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.execute_with_stats(cancel, operation).await.0
    }

    /// Run `operation` with retries and report attempt statistics
    ///
    /// A cancelled loop returns [`ResilienceError::Cancelled`] without
    /// waiting for the rest of the backoff sleep.
    pub async fn execute_with_stats<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> (Result<T, ResilienceError>, RetryStats)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut stats = RetryStats::default();
        let max_attempts = self.policy.max_attempts.max(1);

        loop {
            if cancel.is_cancelled() {
                return (Err(ResilienceError::Cancelled), stats);
            }

            stats.attempts += 1;
            let attempt = stats.attempts;

            let error = match operation(attempt).await {
                Ok(value) => {
                    trace!(attempt, "Attempt succeeded");
                    return (Ok(value), stats);
                }
                Err(ResilienceError::Cancelled) => {
                    return (Err(ResilienceError::Cancelled), stats);
                }
                Err(error) => error,
            };

            if attempt >= max_attempts || !(self.predicate)(&error) {
                return (
                    Err(ResilienceError::RetriesExhausted {
                        attempts: attempt,
                        last_error: Box::new(error),
                    }),
                    stats,
                );
            }

            let delay = self.policy.delay_for_attempt(attempt + 1);
            self.events.publish(&ResilienceEvent::RetryScheduled {
                attempt,
                delay,
                error: error.to_string(),
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return (Err(ResilienceError::Cancelled), stats);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            stats.total_delay += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert_eq!(policy.jitter, 0.25);
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5), 3);

        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_monotonic_and_capped() {
        let policy = RetryPolicy::exponential()
            .with_initial_interval(Duration::from_millis(100))
            .with_backoff_coefficient(2.0)
            .with_max_interval(Duration::from_millis(2000))
            .without_jitter();

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(1600));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_millis(2000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::exponential()
            .with_initial_interval(Duration::from_millis(1000))
            .with_jitter(0.25);

        for _ in 0..200 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(750), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1250), "{:?}", delay);
        }
    }

    #[test]
    fn test_presets() {
        let djen = RetryPolicy::judicial_publications();
        assert_eq!(djen.max_attempts, 2);
        assert_eq!(djen.jitter, 0.0);

        let llm = RetryPolicy::llm_provider();
        assert_eq!(llm.backoff_coefficient, 1.5);
        assert_eq!(llm.max_interval, Duration::from_secs(8));

        assert_eq!(RetryPolicy::external_api().max_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_default_predicate() {
        assert!(is_retryable(&BackendError::network("reset").into()));
        assert!(is_retryable(&BackendError::http(503, "unavailable").into()));
        assert!(is_retryable(&BackendError::rate_limited("slow down").into()));
        assert!(is_retryable(&ResilienceError::Timeout {
            duration: Duration::from_secs(1)
        }));
        assert!(!is_retryable(&BackendError::validation("bad").into()));
        assert!(!is_retryable(&BackendError::unauthorized("no").into()));
        assert!(!is_retryable(&ResilienceError::CircuitOpen {
            name: "x".into(),
            retry_after: Duration::ZERO
        }));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential().with_max_attempts(10);

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(10), max_attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(fast_policy(3));
        let never = CancellationToken::new();

        let (result, stats) = executor
            .execute_with_stats(&never, |_| async { Ok::<_, ResilienceError>("done") })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.total_delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let executor = RetryExecutor::new(fast_policy(5));
        let never = CancellationToken::new();

        let (result, stats) = executor
            .execute_with_stats(&never, |attempt| async move {
                if attempt < 3 {
                    Err(BackendError::http(502, "bad gateway").into())
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.total_delay, Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(BackendError::network(format!("reset #{}", attempt)).into()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            ResilienceError::RetriesExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(
                    *last_error,
                    ResilienceError::Backend(BackendError::network("reset #3"))
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::validation("missing field").into()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ResilienceError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let executor = RetryExecutor::new(fast_policy(4)).with_predicate(|_| true);
        let calls = AtomicU32::new(0);

        let _: Result<(), _> = executor
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::validation("still bad").into()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff_sleep() {
        let executor =
            RetryExecutor::new(RetryPolicy::fixed(Duration::from_secs(3600), 5));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = AtomicU32::new(0);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let (result, stats): (Result<(), _>, _) = executor
            .execute_with_stats(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::network("reset").into()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), ResilienceError::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
