//! Execution coordinator
//!
//! Runs a task against two backends under a [`CoordinationPolicy`]. Each
//! backend call is wrapped, outermost first, in:
//!
//! ```text
//! RateLimiter.check(<callerKey>:<backend>)
//!   └─ CircuitBreaker(<backend>).execute_with_cancel
//!        └─ RetryExecutor.execute_cancellable
//!             └─ TimeoutGuard(attempt_timeout).bound_with_cancel
//!                  └─ BackendInvoker.invoke
//! ```
//!
//! The run timeout is one deadline shared by every backend call of the run.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::invoker::{BackendInvoker, Task};
use super::policy::{CoordinationPolicy, CoordinatorConfig, Slot};
use super::result::{BackendRun, CoordinationResult, Resolution};
use super::stats::StatsRegistry;
use crate::config::ResilienceConfig;
use crate::error::ResilienceError;
use crate::events::{tracing_sink, SharedEventSink};
use crate::rate_limit::RateLimiter;
use crate::reliability::{CircuitBreakerRegistry, RetryExecutor, TimeoutGuard};

/// Top-level orchestrator of backend calls
///
/// # Example
///
/// ```
/// use juris_resilience::coordinator::{CoordinationPolicy, ExecutionCoordinator, FnInvoker, Task};
/// use juris_resilience::BackendError;
/// use serde_json::json;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let coordinator = ExecutionCoordinator::builder().build();
/// let a = FnInvoker::new("traditional", |_, _| async {
///     Err(BackendError::validation("unsupported document"))
/// });
/// let b = FnInvoker::new("graph", |_, _| async { Ok(json!({ "status": "done" })) });
///
/// let task = Task::new("pesquisa-juris", "user:42", json!({}));
/// let result = coordinator
///     .run(&task, &a, &b, CoordinationPolicy::Fallback, Duration::from_secs(5))
///     .await;
///
/// assert!(result.success);
/// assert_eq!(result.mode, "graph");
/// # });
/// ```
pub struct ExecutionCoordinator {
    config: CoordinatorConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    limiter: Option<Arc<RateLimiter>>,
    retry: RetryExecutor,
    stats: Arc<StatsRegistry>,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("config", &self.config)
            .field("breakers", &self.breakers.names())
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ExecutionCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Build a coordinator and its components from aggregate settings
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::from_config_with_events(config, tracing_sink())
    }

    /// Like [`from_config`](Self::from_config), publishing events to `events`
    pub fn from_config_with_events(config: &ResilienceConfig, events: SharedEventSink) -> Self {
        let breakers = CircuitBreakerRegistry::new(config.breaker.clone()).with_event_sink(events.clone());
        let mut builder = Self::builder()
            .with_config(config.coordinator.clone())
            .with_breakers(Arc::new(breakers))
            .with_retry(RetryExecutor::new(config.retry.clone()).with_event_sink(events.clone()));

        if config.rate_limiting {
            let limiter =
                RateLimiter::new("backend", config.rate_limit.clone()).with_event_sink(events);
            builder = builder.with_rate_limiter(Arc::new(limiter));
        }
        builder.build()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Run with the configured default policy and run timeout
    pub async fn run_default(
        &self,
        task: &Task,
        a: &dyn BackendInvoker,
        b: &dyn BackendInvoker,
    ) -> CoordinationResult {
        self.run(task, a, b, self.config.default_policy, self.config.run_timeout)
            .await
    }

    /// Run `task` under `policy`, bounded by `timeout` for the whole run
    pub async fn run(
        &self,
        task: &Task,
        a: &dyn BackendInvoker,
        b: &dyn BackendInvoker,
        policy: CoordinationPolicy,
        timeout: Duration,
    ) -> CoordinationResult {
        let never = CancellationToken::new();
        self.run_with_cancel(task, a, b, policy, timeout, &never).await
    }

    /// Run `task`, stopping early when `cancel` fires
    ///
    /// Never returns an error: failures are embedded in the result and
    /// recorded in the stats exactly once.
    #[instrument(
        skip_all,
        fields(task_id = %task.id, agent_id = %task.agent_id, policy = %policy)
    )]
    pub async fn run_with_cancel(
        &self,
        task: &Task,
        a: &dyn BackendInvoker,
        b: &dyn BackendInvoker,
        policy: CoordinationPolicy,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CoordinationResult {
        let started = Instant::now();
        let deadline = started + timeout;
        let run = Run {
            coordinator: self,
            task,
            deadline,
            timeout,
            cancel,
        };

        let resolution = match policy {
            CoordinationPolicy::SingleA => Resolution::Single {
                run: run.call(a, Slot::A).await,
                fallback_from: None,
            },
            CoordinationPolicy::SingleB => Resolution::Single {
                run: run.call(b, Slot::B).await,
                fallback_from: None,
            },
            CoordinationPolicy::Fallback => {
                let primary = run.call(a, Slot::A).await;
                if primary.succeeded() {
                    Resolution::Single {
                        run: primary,
                        fallback_from: None,
                    }
                } else {
                    debug!(
                        backend = %primary.backend,
                        error = ?primary.error,
                        "Primary backend failed, falling back"
                    );
                    Resolution::Single {
                        run: run.call(b, Slot::B).await,
                        fallback_from: Some(Box::new(primary)),
                    }
                }
            }
            CoordinationPolicy::Sequential => {
                let first = run.call(a, Slot::A).await;
                let second = run.call(b, Slot::B).await;
                Resolution::Hybrid { a: first, b: second }
            }
            CoordinationPolicy::Parallel => {
                let (first, second) = tokio::join!(run.call(a, Slot::A), run.call(b, Slot::B));
                Resolution::Hybrid { a: first, b: second }
            }
        };

        let result = CoordinationResult::new(task.id, policy, resolution, started.elapsed());
        self.stats.record(&result);

        let elapsed_ms = result.execution_time.as_millis() as u64;
        match &result.error {
            None => info!(mode = %result.mode, success = result.success, elapsed_ms, "Coordination run finished"),
            Some(err) => warn!(
                mode = %result.mode,
                error = %err,
                kind = err.kind_label(),
                elapsed_ms,
                "Coordination run failed"
            ),
        }
        result
    }

    async fn protected_call(
        &self,
        task: &Task,
        invoker: &dyn BackendInvoker,
        token: &CancellationToken,
        attempts: &AtomicU32,
    ) -> Result<Value, ResilienceError> {
        if let Some(limiter) = &self.limiter {
            limiter
                .check(&format!("{}:{}", task.caller_key, invoker.name()))
                .await?;
        }

        let breaker = self.breakers.get_or_create(invoker.name());
        let guard = TimeoutGuard::new(self.config.attempt_timeout);
        let guard = &guard;

        breaker
            .execute_with_cancel(token, |call_token| async move {
                self.retry
                    .execute_cancellable(&call_token, |attempt| {
                        attempts.store(attempt, Ordering::Relaxed);
                        guard.bound_with_cancel(&call_token, move |cancel| async move {
                            invoker
                                .invoke(task, cancel)
                                .await
                                .map_err(ResilienceError::from)
                        })
                    })
                    .await
            })
            .await
    }
}

/// Per-run context shared by the backend calls of one run
struct Run<'a> {
    coordinator: &'a ExecutionCoordinator,
    task: &'a Task,
    deadline: Instant,
    timeout: Duration,
    cancel: &'a CancellationToken,
}

impl Run<'_> {
    async fn call(&self, invoker: &dyn BackendInvoker, slot: Slot) -> BackendRun {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let token = self.cancel.child_token();

        let outcome = tokio::time::timeout_at(
            self.deadline,
            self.coordinator
                .protected_call(self.task, invoker, &token, &attempts),
        )
        .await;

        let result = outcome.unwrap_or(Err(ResilienceError::Timeout {
            duration: self.timeout,
        }));
        if result.is_err() {
            token.cancel();
        }

        let (output, error) = match result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };
        BackendRun {
            backend: invoker.name().to_string(),
            slot,
            output,
            error,
            attempts: attempts.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        }
    }
}

/// Builder for [`ExecutionCoordinator`]
#[derive(Default)]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    limiter: Option<Arc<RateLimiter>>,
    retry: Option<RetryExecutor>,
    stats: Option<Arc<StatsRegistry>>,
}

impl CoordinatorBuilder {
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a breaker registry with other components
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Put a rate limiter in front of every backend call
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsRegistry>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn build(self) -> ExecutionCoordinator {
        ExecutionCoordinator {
            config: self.config,
            breakers: self.breakers.unwrap_or_default(),
            limiter: self.limiter,
            retry: self
                .retry
                .unwrap_or_else(|| RetryExecutor::new(Default::default())),
            stats: self.stats.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::invoker::FnInvoker;
    use crate::error::BackendError;
    use crate::reliability::{CircuitBreakerConfig, RetryPolicy};
    use serde_json::json;

    fn task() -> Task {
        Task::new("monitor-djen", "user:1", json!({ "oab": "123456/SP" }))
    }

    fn ok_after(name: &'static str, ms: u64) -> FnInvoker {
        FnInvoker::new(name, move |_, _| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "from": name }))
        })
    }

    fn failing(name: &'static str) -> FnInvoker {
        FnInvoker::new(name, |_, _| async { Err(BackendError::http(503, "unavailable")) })
    }

    fn coordinator() -> ExecutionCoordinator {
        ExecutionCoordinator::builder()
            .with_retry(RetryExecutor::new(RetryPolicy::fixed(Duration::from_millis(10), 2)))
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_policies_use_one_backend() {
        let coordinator = coordinator();
        let a = ok_after("traditional", 5);
        let b = ok_after("graph", 5);

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::SingleB, Duration::from_secs(1))
            .await;

        assert!(result.success);
        assert_eq!(result.mode, "graph");
        assert!(result.run_for(Slot::A).is_none());
        assert_eq!(result.output(), Some(&json!({ "from": "graph" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_not_needed_records_single_a() {
        let coordinator = coordinator();
        let a = ok_after("traditional", 5);
        let b = failing("graph");

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::Fallback, Duration::from_secs(1))
            .await;

        assert!(result.success);
        assert_eq!(result.mode, "traditional");
        let snapshot = coordinator.stats().snapshot();
        assert_eq!(snapshot.per_mode["single_a"].executions, 1);
        assert!(!snapshot.per_mode.contains_key("single_b"));
        assert_eq!(snapshot.per_policy["fallback"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_both_fail() {
        let coordinator = coordinator();
        let a = failing("traditional");
        let b = failing("graph");

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::Fallback, Duration::from_secs(1))
            .await;

        assert!(!result.success);
        assert_eq!(result.mode, "graph");
        match result.error {
            Some(ResilienceError::AllBackendsFailed { primary, secondary }) => {
                assert!(matches!(*primary, ResilienceError::RetriesExhausted { attempts: 2, .. }));
                assert!(matches!(*secondary, ResilienceError::RetriesExhausted { .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(coordinator.stats().snapshot().errors["backend"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_always_runs_both() {
        let coordinator = coordinator();
        let a = failing("traditional");
        let b = ok_after("graph", 20);

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::Sequential, Duration::from_secs(1))
            .await;

        assert!(result.success);
        assert_eq!(result.mode, "hybrid");
        assert_eq!(result.run_for(Slot::A).unwrap().attempts, 2);
        assert!(result.run_for(Slot::B).unwrap().succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let coordinator = ExecutionCoordinator::builder()
            .with_config(CoordinatorConfig::new().with_attempt_timeout(Duration::from_millis(50)))
            .with_retry(RetryExecutor::new(RetryPolicy::fixed(Duration::from_millis(10), 3)))
            .build();
        let a = ok_after("traditional", 500);
        let b = ok_after("graph", 1);

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::SingleA, Duration::from_secs(10))
            .await;

        assert!(!result.success);
        let run = result.run_for(Slot::A).unwrap();
        assert_eq!(run.attempts, 3);
        assert!(run.error.as_ref().unwrap().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_bounds_parallel() {
        let coordinator = coordinator();
        let a = ok_after("traditional", 50);
        let b = ok_after("graph", 5_000);

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::Parallel, Duration::from_millis(200))
            .await;

        assert!(result.success);
        assert!(result.execution_time < Duration::from_millis(250));
        let b_run = result.run_for(Slot::B).unwrap();
        assert_eq!(
            b_run.error,
            Some(ResilienceError::Timeout {
                duration: Duration::from_millis(200)
            })
        );
        assert!(result.run_for(Slot::A).unwrap().succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast_and_falls_back() {
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new().with_failure_threshold(1),
        ));
        let coordinator = ExecutionCoordinator::builder()
            .with_breakers(breakers.clone())
            .with_retry(RetryExecutor::new(RetryPolicy::no_retry()))
            .build();
        let a = failing("traditional");
        let b = ok_after("graph", 1);

        coordinator
            .run(&task(), &a, &b, CoordinationPolicy::SingleA, Duration::from_secs(1))
            .await;

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::Fallback, Duration::from_secs(1))
            .await;

        assert!(result.success);
        assert_eq!(result.mode, "graph");
        let primary = match &result.resolution {
            Resolution::Single {
                fallback_from: Some(primary),
                ..
            } => primary,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(primary.error.as_ref().unwrap().is_circuit_open());
        assert_eq!(primary.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_per_backend() {
        let limiter = Arc::new(RateLimiter::new(
            "backend",
            crate::rate_limit::RateLimitConfig::default().with_max_requests(1),
        ));
        let coordinator = ExecutionCoordinator::builder()
            .with_rate_limiter(limiter)
            .build();
        let a = ok_after("traditional", 1);
        let b = ok_after("graph", 1);

        let first = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::SingleA, Duration::from_secs(1))
            .await;
        assert!(first.success);

        let second = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::Fallback, Duration::from_secs(1))
            .await;
        assert!(second.success);
        assert_eq!(second.mode, "graph");
        assert_eq!(
            coordinator.stats().snapshot().errors.get("rate_limited"),
            Some(&1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_run() {
        let coordinator = coordinator();
        let a = ok_after("traditional", 10_000);
        let b = ok_after("graph", 10_000);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = coordinator
            .run_with_cancel(
                &task(),
                &a,
                &b,
                CoordinationPolicy::Parallel,
                Duration::from_secs(60),
                &cancel,
            )
            .await;

        assert!(!result.success);
        assert!(result.execution_time < Duration::from_secs(1));
        assert_eq!(
            result.run_for(Slot::A).unwrap().error,
            Some(ResilienceError::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_timeout_cancels_backend_work() {
        let coordinator = ExecutionCoordinator::builder()
            .with_breakers(Arc::new(CircuitBreakerRegistry::new(
                CircuitBreakerConfig::new().with_call_timeout(Duration::from_millis(50)),
            )))
            .with_retry(RetryExecutor::new(RetryPolicy::no_retry()))
            .build();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
        let a = FnInvoker::new("traditional", move |_, cancel| {
            let tx = Arc::clone(&tx);
            async move {
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(());
                    }
                });
                std::future::pending::<Result<Value, BackendError>>().await
            }
        });
        let b = ok_after("graph", 5);

        let result = coordinator
            .run(&task(), &a, &b, CoordinationPolicy::SingleA, Duration::from_secs(10))
            .await;

        assert!(!result.success);
        assert!(result.error.as_ref().is_some_and(ResilienceError::is_timeout));
        assert!(result.execution_time < Duration::from_secs(1));
        tokio::time::timeout(Duration::from_millis(200), rx)
            .await
            .expect("backend work was not cancelled")
            .unwrap();
    }
}
