//! Execution statistics
//!
//! Counters sit behind one short-lived mutex; `record` and `snapshot` hold
//! it only for a few additions or a copy.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

use super::result::{CoordinationResult, ExecutionMode};

/// Per-mode breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModeStats {
    pub executions: u64,
    pub successes: u64,
    pub total_time_ms: u64,
}

impl ModeStats {
    pub fn average_time_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / self.executions as f64
        }
    }
}

/// Consistent copy of the aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Fraction of successful runs, 0.0 when nothing ran
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    /// Keyed by resolved mode (`single_a`, `single_b`, `hybrid`)
    pub per_mode: BTreeMap<String, ModeStats>,
    /// Keyed by requested policy
    pub per_policy: BTreeMap<String, u64>,
    /// Failed backend runs keyed by root error kind
    pub errors: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    pub fn mode(&self, mode: ExecutionMode) -> ModeStats {
        self.per_mode.get(mode.as_str()).copied().unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_executions: u64,
    success_count: u64,
    total_time_ms: u64,
    per_mode: BTreeMap<String, ModeStats>,
    per_policy: BTreeMap<String, u64>,
    errors: BTreeMap<String, u64>,
}

/// Shared aggregate of coordination runs
#[derive(Debug, Default)]
pub struct StatsRegistry {
    counters: Mutex<Counters>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one finished run
    pub fn record(&self, result: &CoordinationResult) {
        let elapsed_ms = result.execution_time.as_millis() as u64;
        let failed_kinds: Vec<&'static str> = result
            .resolution
            .runs()
            .into_iter()
            .filter_map(|run| run.error.as_ref())
            .map(|err| err.root_cause().kind_label())
            .collect();

        let mut counters = self.counters.lock();
        counters.total_executions += 1;
        counters.total_time_ms += elapsed_ms;
        if result.success {
            counters.success_count += 1;
        }

        let mode = counters
            .per_mode
            .entry(result.execution_mode().as_str().to_string())
            .or_default();
        mode.executions += 1;
        mode.total_time_ms += elapsed_ms;
        if result.success {
            mode.successes += 1;
        }

        *counters
            .per_policy
            .entry(result.policy.as_str().to_string())
            .or_default() += 1;

        for kind in failed_kinds {
            *counters.errors.entry(kind.to_string()).or_default() += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.lock();
        let total = counters.total_executions;
        let (success_rate, average) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                counters.success_count as f64 / total as f64,
                counters.total_time_ms as f64 / total as f64,
            )
        };

        StatsSnapshot {
            total_executions: total,
            success_count: counters.success_count,
            failure_count: total - counters.success_count,
            success_rate,
            average_execution_time_ms: average,
            per_mode: counters.per_mode.clone(),
            per_policy: counters.per_policy.clone(),
            errors: counters.errors.clone(),
        }
    }

    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}
