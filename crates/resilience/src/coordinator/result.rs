//! Coordination results

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::policy::{CoordinationPolicy, Slot};
use crate::config::duration_millis;
use crate::error::ResilienceError;

/// Outcome of one backend inside a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendRun {
    /// Invoker name
    pub backend: String,
    pub slot: Slot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResilienceError>,
    /// Invocations made; zero when rejected before the first attempt
    pub attempts: u32,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl BackendRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Which backend(s) produced the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SingleA,
    SingleB,
    Hybrid,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 3] = [Self::SingleA, Self::SingleB, Self::Hybrid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleA => "single_a",
            Self::SingleB => "single_b",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend runs of a coordination, shaped by how it resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// One backend produced the result
    Single {
        run: BackendRun,
        /// The failed primary attempt when a fallback took over
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback_from: Option<Box<BackendRun>>,
    },

    /// Both backends ran to completion
    Hybrid { a: BackendRun, b: BackendRun },
}

impl Resolution {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Single { run, .. } => match run.slot {
                Slot::A => ExecutionMode::SingleA,
                Slot::B => ExecutionMode::SingleB,
            },
            Self::Hybrid { .. } => ExecutionMode::Hybrid,
        }
    }

    /// Every backend run, in invocation order
    pub fn runs(&self) -> Vec<&BackendRun> {
        match self {
            Self::Single {
                run,
                fallback_from: Some(primary),
            } => vec![primary.as_ref(), run],
            Self::Single { run, .. } => vec![run],
            Self::Hybrid { a, b } => vec![a, b],
        }
    }
}

/// Structured result of `ExecutionCoordinator::run`
///
/// A failed run is still an `Ok` value with `success == false` and a
/// populated `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinationResult {
    pub task_id: Uuid,

    /// Policy the caller requested
    pub policy: CoordinationPolicy,

    pub success: bool,

    /// Backend name for single resolutions, `"hybrid"` otherwise
    pub mode: String,

    pub resolution: Resolution,

    #[serde(with = "duration_millis")]
    pub execution_time: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResilienceError>,
}

impl CoordinationResult {
    pub(crate) fn new(
        task_id: Uuid,
        policy: CoordinationPolicy,
        resolution: Resolution,
        execution_time: Duration,
    ) -> Self {
        let (success, mode, error) = match &resolution {
            Resolution::Single { run, fallback_from } => {
                let primary = fallback_from.as_ref().and_then(|p| p.error.as_ref());
                let error = match (primary, &run.error) {
                    (_, None) => None,
                    (Some(primary), Some(secondary)) => Some(ResilienceError::AllBackendsFailed {
                        primary: Box::new(primary.clone()),
                        secondary: Box::new(secondary.clone()),
                    }),
                    (None, Some(err)) => Some(err.clone()),
                };
                (run.succeeded(), run.backend.clone(), error)
            }
            Resolution::Hybrid { a, b } => {
                let error = match (&a.error, &b.error) {
                    (Some(primary), Some(secondary)) => Some(ResilienceError::AllBackendsFailed {
                        primary: Box::new(primary.clone()),
                        secondary: Box::new(secondary.clone()),
                    }),
                    _ => None,
                };
                (a.succeeded() || b.succeeded(), "hybrid".to_string(), error)
            }
        };

        Self {
            task_id,
            policy,
            success,
            mode,
            resolution,
            execution_time,
            error,
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.resolution.mode()
    }

    /// Output of the single backend, or of A then B for hybrid runs
    pub fn output(&self) -> Option<&Value> {
        match &self.resolution {
            Resolution::Single { run, .. } => run.output.as_ref(),
            Resolution::Hybrid { a, b } => a.output.as_ref().or(b.output.as_ref()),
        }
    }

    pub fn run_for(&self, slot: Slot) -> Option<&BackendRun> {
        self.resolution.runs().into_iter().find(|run| run.slot == slot)
    }
}
