//! Two-backend execution coordination
//!
//! This module provides:
//! - [`ExecutionCoordinator`] - Runs a task under a [`CoordinationPolicy`]
//! - [`StatsRegistry`] - Aggregate counters of finished runs
//! - [`HybridOrchestrator`] - Agent-aware front end over the coordinator

mod catalog;
mod executor;
mod invoker;
mod policy;
mod result;
mod stats;

pub use catalog::{AgentCatalog, AgentEntry, GraphKind, HybridOrchestrator};
pub use executor::{CoordinatorBuilder, ExecutionCoordinator};
pub use invoker::{BackendInvoker, FnInvoker, SharedInvoker, Task};
pub use policy::{CoordinationPolicy, CoordinatorConfig, ExecutionConfig, Slot};
pub use result::{BackendRun, CoordinationResult, ExecutionMode, Resolution};
pub use stats::{ModeStats, StatsRegistry, StatsSnapshot};
