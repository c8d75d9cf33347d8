//! Agent catalog and hybrid orchestration

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::executor::ExecutionCoordinator;
use super::invoker::{SharedInvoker, Task};
use super::policy::ExecutionConfig;
use super::result::CoordinationResult;
use super::stats::StatsSnapshot;
use crate::error::ResilienceError;

/// Graph implementation flavor of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphKind {
    /// Judicial publication monitor
    GraphDjen,
    /// Generic graph workflow
    GraphCustom,
}

impl std::fmt::Display for GraphKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GraphDjen => write!(f, "graph_djen"),
            Self::GraphCustom => write!(f, "graph_custom"),
        }
    }
}

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentEntry {
    pub agent_id: String,
    pub kind: GraphKind,
}

/// Agents that have a graph-based implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCatalog {
    agents: BTreeMap<String, GraphKind>,
}

const DEFAULT_AGENTS: [(&str, GraphKind); 15] = [
    ("harvey-specter", GraphKind::GraphCustom),
    ("mrs-justine", GraphKind::GraphCustom),
    ("monitor-djen", GraphKind::GraphDjen),
    ("analise-documental", GraphKind::GraphCustom),
    ("analise-risco", GraphKind::GraphCustom),
    ("compliance", GraphKind::GraphCustom),
    ("comunicacao-clientes", GraphKind::GraphCustom),
    ("estrategia-processual", GraphKind::GraphCustom),
    ("financeiro", GraphKind::GraphCustom),
    ("gestao-prazos", GraphKind::GraphCustom),
    ("organizacao-arquivos", GraphKind::GraphCustom),
    ("pesquisa-juris", GraphKind::GraphCustom),
    ("redacao-peticoes", GraphKind::GraphCustom),
    ("revisao-contratual", GraphKind::GraphCustom),
    ("traducao-juridica", GraphKind::GraphCustom),
];

impl Default for AgentCatalog {
    fn default() -> Self {
        DEFAULT_AGENTS
            .iter()
            .map(|(id, kind)| (id.to_string(), *kind))
            .collect()
    }
}

impl FromIterator<(String, GraphKind)> for AgentCatalog {
    fn from_iter<I: IntoIterator<Item = (String, GraphKind)>>(iter: I) -> Self {
        Self {
            agents: iter.into_iter().collect(),
        }
    }
}

impl AgentCatalog {
    /// An empty catalog
    pub fn empty() -> Self {
        Self {
            agents: BTreeMap::new(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>, kind: GraphKind) -> Self {
        self.agents.insert(agent_id.into(), kind);
        self
    }

    pub fn has_hybrid_version(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn kind(&self, agent_id: &str) -> Option<GraphKind> {
        self.agents.get(agent_id).copied()
    }

    /// Entries sorted by agent id
    pub fn list(&self) -> Vec<AgentEntry> {
        self.agents
            .iter()
            .map(|(agent_id, kind)| AgentEntry {
                agent_id: agent_id.clone(),
                kind: *kind,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Runs agent tasks on the traditional and graph backends
pub struct HybridOrchestrator {
    coordinator: Arc<ExecutionCoordinator>,
    catalog: AgentCatalog,
    traditional: SharedInvoker,
    graph: SharedInvoker,
    config: ExecutionConfig,
}

impl HybridOrchestrator {
    pub fn new(
        coordinator: Arc<ExecutionCoordinator>,
        traditional: SharedInvoker,
        graph: SharedInvoker,
    ) -> Self {
        Self {
            coordinator,
            catalog: AgentCatalog::default(),
            traditional,
            graph,
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: AgentCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<ExecutionCoordinator> {
        &self.coordinator
    }

    /// Execute a task for `agent_id`
    ///
    /// Fails before running anything when no backend is usable for the
    /// agent; every other failure is embedded in the result.
    pub async fn execute_task(
        &self,
        agent_id: &str,
        caller_key: &str,
        payload: Value,
    ) -> Result<CoordinationResult, ResilienceError> {
        let policy = self
            .config
            .effective_policy(self.catalog.has_hybrid_version(agent_id))?;
        debug!(agent_id, requested = %self.config.policy, effective = %policy, "Resolved execution policy");

        let task = Task::new(agent_id, caller_key, payload);
        Ok(self
            .coordinator
            .run(
                &task,
                self.traditional.as_ref(),
                self.graph.as_ref(),
                policy,
                self.config.timeout,
            )
            .await)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.coordinator.stats().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::invoker::FnInvoker;
    use crate::coordinator::policy::CoordinationPolicy;
    use crate::coordinator::result::ExecutionMode;
    use serde_json::json;

    fn orchestrator(config: ExecutionConfig) -> HybridOrchestrator {
        let traditional = FnInvoker::new("traditional", |task: Task, _| async move {
            Ok(json!({ "agent": task.agent_id, "via": "traditional" }))
        })
        .shared();
        let graph = FnInvoker::new("graph", |task: Task, _| async move {
            Ok(json!({ "agent": task.agent_id, "via": "graph" }))
        })
        .shared();

        HybridOrchestrator::new(
            Arc::new(ExecutionCoordinator::builder().build()),
            traditional,
            graph,
        )
        .with_config(config)
    }

    #[test]
    fn test_default_catalog() {
        let catalog = AgentCatalog::default();
        assert_eq!(catalog.len(), 15);
        assert!(catalog.has_hybrid_version("monitor-djen"));
        assert_eq!(catalog.kind("monitor-djen"), Some(GraphKind::GraphDjen));
        assert_eq!(catalog.kind("financeiro"), Some(GraphKind::GraphCustom));
        assert!(!catalog.has_hybrid_version("unknown-agent"));

        let listed = catalog.list();
        assert_eq!(listed[0].agent_id, "analise-documental");
    }

    #[tokio::test]
    async fn test_hybrid_agent_runs_requested_policy() {
        let orchestrator = orchestrator(ExecutionConfig::new().with_policy(CoordinationPolicy::Parallel));

        let result = orchestrator
            .execute_task("pesquisa-juris", "user:1", json!({}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.execution_mode(), ExecutionMode::Hybrid);
        assert_eq!(orchestrator.stats().total_executions, 1);
    }

    #[tokio::test]
    async fn test_agent_without_graph_runs_traditional() {
        let orchestrator = orchestrator(ExecutionConfig::new().with_policy(CoordinationPolicy::Parallel));

        let result = orchestrator
            .execute_task("legacy-agent", "user:1", json!({}))
            .await
            .unwrap();

        assert_eq!(result.policy, CoordinationPolicy::SingleA);
        assert_eq!(result.mode, "traditional");
    }

    #[tokio::test]
    async fn test_no_backend_enabled_is_rejected() {
        let orchestrator = orchestrator(ExecutionConfig::new().with_traditional(false).with_graph(false));

        let err = orchestrator
            .execute_task("monitor-djen", "user:1", json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Backend(_)));
        assert_eq!(orchestrator.stats().total_executions, 0);
    }
}
