//! Backend invoker trait and task definition

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::BackendError;

/// A unit of work handed to the backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,

    /// Agent the task is addressed to
    pub agent_id: String,

    /// Identity the rate limiter counts against (user, IP, API key)
    pub caller_key: String,

    pub payload: Value,
}

impl Task {
    pub fn new(agent_id: impl Into<String>, caller_key: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            agent_id: agent_id.into(),
            caller_key: caller_key.into(),
            payload,
        }
    }
}

/// One way of executing a task
///
/// Implementations classify their failures with an
/// [`ErrorKind`](crate::error::ErrorKind) so retry decisions never depend on
/// message text. The token is cancelled when the attempt times out or the
/// run is abandoned; checking it is optional but lets the backend stop work
/// early.
///
/// # Example
///
/// ```ignore
/// struct DjenSearch { client: reqwest::Client }
///
/// #[async_trait]
/// impl BackendInvoker for DjenSearch {
///     fn name(&self) -> &str {
///         "traditional"
///     }
///
///     async fn invoke(&self, task: &Task, cancel: CancellationToken) -> Result<Value, BackendError> {
///         // Call the upstream service...
///         Ok(json!({ "publications": [] }))
///     }
/// }
/// ```
#[async_trait]
pub trait BackendInvoker: Send + Sync + 'static {
    /// Stable name, used as the breaker name and in results
    fn name(&self) -> &str;

    async fn invoke(&self, task: &Task, cancel: CancellationToken) -> Result<Value, BackendError>;
}

/// Shared invoker handle
pub type SharedInvoker = Arc<dyn BackendInvoker>;

type InvokeFn = dyn Fn(Task, CancellationToken) -> futures::future::BoxFuture<'static, Result<Value, BackendError>>
    + Send
    + Sync;

/// [`BackendInvoker`] built from a closure
pub struct FnInvoker {
    name: String,
    f: Box<InvokeFn>,
}

impl FnInvoker {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Task, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BackendError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |task, cancel| Box::pin(f(task, cancel))),
        }
    }

    /// Wrap into a shared handle
    pub fn shared(self) -> SharedInvoker {
        Arc::new(self)
    }
}

impl std::fmt::Debug for FnInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvoker").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl BackendInvoker for FnInvoker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, task: &Task, cancel: CancellationToken) -> Result<Value, BackendError> {
        (self.f)(task.clone(), cancel).await
    }
}
