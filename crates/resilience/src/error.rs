//! Error taxonomy for the protection stack
//!
//! Every layer either resolves a failure or wraps it with more context;
//! nothing is discarded. Backend failures carry an explicit [`ErrorKind`]
//! so retry decisions never depend on message text.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Classification of a failure reported by a backend invoker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "status", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection reset, refused, DNS failure
    Network,
    /// The backend itself reported a timeout
    Timeout,
    /// HTTP-equivalent status code
    Http(u16),
    /// The backend asked us to slow down
    RateLimited,
    /// Bad input; retrying cannot help
    Validation,
    /// Missing or rejected credentials
    Unauthorized,
    /// Requested entity does not exist
    NotFound,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Whether failures of this kind are worth retrying
    ///
    /// Network faults, timeouts, 5xx statuses and explicit rate-limit
    /// signals are transient. Everything else fails fast.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network | Self::Timeout | Self::RateLimited => true,
            Self::Http(status) => (500..600).contains(status) || *status == 429,
            Self::Validation | Self::Unauthorized | Self::NotFound | Self::Internal => false,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Http(status) => write!(f, "http {}", status),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Validation => write!(f, "validation"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::NotFound => write!(f, "not_found"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Failure surfaced verbatim from a backend invoker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// Failure classification
    pub kind: ErrorKind,

    /// Human-readable message
    pub message: String,

    /// Additional error details (for debugging)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BackendError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http(status), message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<anyhow::Error> for BackendError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

/// Errors produced by the protection stack and the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ResilienceError {
    /// Dependency presumed unhealthy; the call was never attempted
    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        name: String,
        #[serde(with = "duration_millis")]
        retry_after: Duration,
    },

    /// Caller exceeded its quota
    #[error("rate limit exceeded for '{key}', capacity frees at {reset_at_ms}")]
    RateLimited { key: String, reset_at_ms: i64 },

    /// Operation exceeded its bound; its side effects may still be in flight
    #[error("operation timed out after {duration:?}")]
    Timeout {
        #[serde(with = "duration_millis")]
        duration: Duration,
    },

    /// Retry budget spent; wraps the last underlying failure
    #[error("gave up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: Box<ResilienceError>,
    },

    /// The caller's cancellation signal fired
    #[error("operation cancelled")]
    Cancelled,

    /// Opaque failure from a backend invoker
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Both backends failed; the secondary (more recent) failure carries the
    /// primary one as context
    #[error("{secondary} (primary failed: {primary})")]
    AllBackendsFailed {
        primary: Box<ResilienceError>,
        #[source]
        secondary: Box<ResilienceError>,
    },
}

impl ResilienceError {
    /// Stable label used for metrics and logs
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Cancelled => "cancelled",
            Self::Backend(_) => "backend",
            Self::AllBackendsFailed { .. } => "all_backends_failed",
        }
    }

    /// Innermost failure, looking through retry and fallback wrappers
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            Self::RetriesExhausted { last_error, .. } => last_error.root_cause(),
            Self::AllBackendsFailed { secondary, .. } => secondary.root_cause(),
            other => other,
        }
    }

    /// Backend error kind of the root cause, if the root cause is a backend failure
    pub fn backend_kind(&self) -> Option<ErrorKind> {
        match self.root_cause() {
            Self::Backend(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root_cause(), Self::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout { .. })
    }
}
