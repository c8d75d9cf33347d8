//! Deadline enforcement
//!
//! [`TimeoutGuard`] races an operation against a timer. When the timer wins
//! the operation's future is dropped and its cancellation token is fired.
//! Work the operation already handed off (an in-flight HTTP request, a
//! spawned task) is not undone: callers must treat post-timeout side
//! effects as possibly still happening.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ResilienceError;

/// Bounds the wall-clock duration of an operation
///
/// # Example
///
/// ```
/// use juris_resilience::reliability::TimeoutGuard;
/// use juris_resilience::ResilienceError;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let guard = TimeoutGuard::new(Duration::from_millis(50));
/// let result = guard
///     .bound(async {
///         tokio::time::sleep(Duration::from_secs(5)).await;
///         Ok::<_, ResilienceError>(())
///     })
///     .await;
/// assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
/// # });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    duration: Duration,
}

impl TimeoutGuard {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Race `operation` against the deadline
    pub async fn bound<T, Fut>(&self, operation: Fut) -> Result<T, ResilienceError>
    where
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        match tokio::time::timeout(self.duration, operation).await {
            Ok(result) => result,
            Err(_) => Err(ResilienceError::Timeout {
                duration: self.duration,
            }),
        }
    }

    /// Race an operation against the deadline and the caller's cancellation
    ///
    /// The operation receives a child of `parent`. That child is cancelled
    /// when the deadline passes, so cooperative backends can stop early.
    /// Cancelling `parent` resolves to [`ResilienceError::Cancelled`].
    pub async fn bound_with_cancel<T, F, Fut>(
        &self,
        parent: &CancellationToken,
        operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        if parent.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        let token = parent.child_token();
        let operation = operation(token.clone());

        tokio::select! {
            biased;
            _ = parent.cancelled() => Err(ResilienceError::Cancelled),
            result = operation => result,
            _ = tokio::time::sleep(self.duration) => {
                token.cancel();
                Err(ResilienceError::Timeout { duration: self.duration })
            }
        }
    }
}

/// Race `operation` against a deadline of `duration`
pub async fn bound<T, Fut>(duration: Duration, operation: Fut) -> Result<T, ResilienceError>
where
    Fut: Future<Output = Result<T, ResilienceError>>,
{
    TimeoutGuard::new(duration).bound(operation).await
}
