//! Coordination policies and their configuration

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;
use crate::error::{BackendError, ResilienceError};

/// Which of the two backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// The traditional backend
    A,
    /// The graph-based backend
    B,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "a"),
            Self::B => write!(f, "b"),
        }
    }
}

/// How the coordinator combines the two backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationPolicy {
    /// Only backend A
    SingleA,
    /// Only backend B
    SingleB,
    /// A, then B if A failed for any reason
    Fallback,
    /// A then B, always both
    Sequential,
    /// A and B concurrently under one joint deadline
    Parallel,
}

impl CoordinationPolicy {
    pub const ALL: [CoordinationPolicy; 5] = [
        Self::SingleA,
        Self::SingleB,
        Self::Fallback,
        Self::Sequential,
        Self::Parallel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleA => "single_a",
            Self::SingleB => "single_b",
            Self::Fallback => "fallback",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

impl std::fmt::Display for CoordinationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_a" | "a" | "traditional" => Ok(Self::SingleA),
            "single_b" | "b" | "graph" => Ok(Self::SingleB),
            "fallback" => Ok(Self::Fallback),
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!(
                "unknown coordination policy '{}', expected one of: single_a, single_b, fallback, sequential, parallel",
                other
            )),
        }
    }
}

/// Coordinator timeouts and default policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    /// Bound on a single backend attempt
    #[serde(with = "duration_millis")]
    pub attempt_timeout: Duration,

    /// Bound on a whole run, shared by both backends
    #[serde(with = "duration_millis")]
    pub run_timeout: Duration,

    /// Policy used when the caller does not pick one
    pub default_policy: CoordinationPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(30),
            default_policy: CoordinationPolicy::Parallel,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_default_policy(mut self, policy: CoordinationPolicy) -> Self {
        self.default_policy = policy;
        self
    }
}

/// Which backends an orchestrator may use, and how
///
/// Backend A is the traditional implementation, backend B the graph-based
/// one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionConfig {
    pub enable_traditional: bool,
    pub enable_graph: bool,
    pub policy: CoordinationPolicy,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enable_traditional: true,
            enable_graph: true,
            policy: CoordinationPolicy::Parallel,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_traditional(mut self, enabled: bool) -> Self {
        self.enable_traditional = enabled;
        self
    }

    pub fn with_graph(mut self, enabled: bool) -> Self {
        self.enable_graph = enabled;
        self
    }

    pub fn with_policy(mut self, policy: CoordinationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Policy to actually run for an agent
    ///
    /// Collapses to a single backend when only one is usable. Fails when
    /// neither is.
    pub fn effective_policy(&self, has_graph: bool) -> Result<CoordinationPolicy, ResilienceError> {
        let graph = self.enable_graph && has_graph;
        match (self.enable_traditional, graph) {
            (true, true) => Ok(self.policy),
            (true, false) => Ok(CoordinationPolicy::SingleA),
            (false, true) => Ok(CoordinationPolicy::SingleB),
            (false, false) => Err(BackendError::validation(if self.enable_graph {
                "traditional execution is disabled and the agent has no graph implementation"
            } else {
                "no backend enabled"
            })
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("fallback".parse::<CoordinationPolicy>(), Ok(CoordinationPolicy::Fallback));
        assert_eq!("Single-A".parse::<CoordinationPolicy>(), Ok(CoordinationPolicy::SingleA));
        assert_eq!("graph".parse::<CoordinationPolicy>(), Ok(CoordinationPolicy::SingleB));
        assert!("round_robin".parse::<CoordinationPolicy>().is_err());

        for policy in CoordinationPolicy::ALL {
            assert_eq!(policy.to_string().parse::<CoordinationPolicy>(), Ok(policy));
        }
    }

    #[test]
    fn test_effective_policy_collapses() {
        let both = ExecutionConfig::new().with_policy(CoordinationPolicy::Fallback);
        assert_eq!(both.effective_policy(true), Ok(CoordinationPolicy::Fallback));
        assert_eq!(both.effective_policy(false), Ok(CoordinationPolicy::SingleA));

        let graph_only = ExecutionConfig::new().with_traditional(false);
        assert_eq!(graph_only.effective_policy(true), Ok(CoordinationPolicy::SingleB));

        let err = graph_only.effective_policy(false).unwrap_err();
        assert_eq!(err.backend_kind(), Some(crate::error::ErrorKind::Validation));

        let none = ExecutionConfig::new().with_traditional(false).with_graph(false);
        assert!(none.effective_policy(true).is_err());
    }

    #[test]
    fn test_serialization() {
        let config = ExecutionConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["policy"], "parallel");
        assert_eq!(json["timeout"], 30_000);
    }
}
