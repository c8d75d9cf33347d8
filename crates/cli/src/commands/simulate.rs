// Simulated coordination runs

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Args;
use futures::stream::{self, StreamExt};
use juris_resilience::coordinator::{ExecutionConfig, FnInvoker, HybridOrchestrator};
use juris_resilience::{
    BackendError, CoordinationPolicy, CoordinationResult, ExecutionCoordinator, ResilienceConfig,
};
use rand::Rng;
use serde_json::json;

use crate::output::{print_field, print_section, print_table_header, print_table_row, OutputFormat};

#[derive(Args)]
pub struct SimulateArgs {
    /// Coordination policy (single_a, single_b, fallback, sequential, parallel)
    #[arg(long, short, env = "JURIS_POLICY")]
    pub policy: Option<String>,

    /// Agent to run the tasks for
    #[arg(long, short, default_value = "pesquisa-juris")]
    pub agent: String,

    /// Number of tasks to run
    #[arg(long, short, default_value = "20")]
    pub runs: u32,

    /// Maximum tasks in flight at once
    #[arg(long, short, default_value = "4")]
    pub concurrency: usize,

    /// Latency of the traditional backend
    #[arg(long, default_value = "50")]
    pub a_latency_ms: u64,

    /// Latency of the graph backend
    #[arg(long, default_value = "80")]
    pub b_latency_ms: u64,

    /// Probability that a traditional call fails
    #[arg(long, default_value = "0.1")]
    pub a_failure_rate: f64,

    /// Probability that a graph call fails
    #[arg(long, default_value = "0.1")]
    pub b_failure_rate: f64,

    /// Number of distinct callers the tasks are spread across
    #[arg(long, default_value = "4")]
    pub callers: u32,
}

impl SimulateArgs {
    fn validate(&self) -> Result<()> {
        ensure!(self.concurrency > 0, "--concurrency must be at least 1");
        ensure!(self.callers > 0, "--callers must be at least 1");
        for (flag, rate) in [
            ("--a-failure-rate", self.a_failure_rate),
            ("--b-failure-rate", self.b_failure_rate),
        ] {
            ensure!((0.0..=1.0).contains(&rate), "{} must be between 0 and 1", flag);
        }
        Ok(())
    }
}

/// Backend that sleeps for `latency` and fails with probability `failure_rate`
fn simulated_backend(name: &'static str, latency: Duration, failure_rate: f64) -> FnInvoker {
    FnInvoker::new(name, move |task, cancel| async move {
        let fail = rand::thread_rng().gen_bool(failure_rate);

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(BackendError::timeout(format!("{} call abandoned", name)));
            }
            _ = tokio::time::sleep(latency) => {}
        }

        if fail {
            Err(BackendError::http(503, format!("{} backend unavailable", name)))
        } else {
            Ok(json!({ "agent": task.agent_id, "backend": name }))
        }
    })
}

pub async fn run(args: SimulateArgs, output: OutputFormat, quiet: bool) -> Result<()> {
    args.validate()?;

    let config = ResilienceConfig::from_env();
    config.validate().context("Invalid resilience configuration")?;

    let policy = match &args.policy {
        Some(raw) => raw
            .parse::<CoordinationPolicy>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid --policy: {}", raw))?,
        None => config.coordinator.default_policy,
    };

    let coordinator = Arc::new(ExecutionCoordinator::from_config(&config));
    let orchestrator = Arc::new(
        HybridOrchestrator::new(
            coordinator,
            simulated_backend(
                "traditional",
                Duration::from_millis(args.a_latency_ms),
                args.a_failure_rate,
            )
            .shared(),
            simulated_backend(
                "graph",
                Duration::from_millis(args.b_latency_ms),
                args.b_failure_rate,
            )
            .shared(),
        )
        .with_config(
            ExecutionConfig::new()
                .with_policy(policy)
                .with_timeout(config.coordinator.run_timeout),
        ),
    );

    tracing::info!(
        agent = %args.agent,
        policy = %policy,
        runs = args.runs,
        concurrency = args.concurrency,
        "Starting simulation"
    );

    let show_rows = output.is_text() && !quiet;
    if show_rows {
        print_table_header(&[("RUN", 5), ("MODE", 12), ("OK", 5), ("TIME", 8), ("ERROR", 50)]);
    }

    let callers = args.callers;
    let agent = args.agent.clone();
    let mut outcomes = stream::iter(0..args.runs)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            let agent = agent.clone();
            async move {
                let caller = format!("sim-caller-{}", i % callers);
                let result = orchestrator
                    .execute_task(&agent, &caller, json!({ "run": i }))
                    .await;
                (i, result)
            }
        })
        .buffer_unordered(args.concurrency);

    let mut results: Vec<CoordinationResult> = Vec::with_capacity(args.runs as usize);
    while let Some((i, result)) = outcomes.next().await {
        let result = result.with_context(|| format!("Run {} could not start", i))?;
        if show_rows {
            let error = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".to_string());
            print_table_row(&[
                (&i.to_string(), 5),
                (&result.mode, 12),
                (if result.success { "yes" } else { "no" }, 5),
                (&format!("{}ms", result.execution_time.as_millis()), 8),
                (&error, 50),
            ]);
        }
        results.push(result);
    }

    let stats = orchestrator.stats();

    if !output.is_text() {
        let breakers = orchestrator.coordinator().breakers().all_stats();
        return output.print_value(&json!({
            "policy": policy,
            "results": results,
            "stats": stats,
            "breakers": breakers,
        }));
    }

    print_section("Summary");
    print_field("Policy", policy.as_str());
    print_field("Executions", &stats.total_executions.to_string());
    print_field("Succeeded", &stats.success_count.to_string());
    print_field("Failed", &stats.failure_count.to_string());
    print_field("Success rate", &format!("{:.1}%", stats.success_rate * 100.0));
    print_field(
        "Average time",
        &format!("{:.1}ms", stats.average_execution_time_ms),
    );

    if !stats.per_mode.is_empty() {
        print_section("By mode");
        print_table_header(&[("MODE", 10), ("RUNS", 6), ("OK", 6), ("AVG", 10)]);
        for (mode, mode_stats) in &stats.per_mode {
            print_table_row(&[
                (mode, 10),
                (&mode_stats.executions.to_string(), 6),
                (&mode_stats.successes.to_string(), 6),
                (&format!("{:.1}ms", mode_stats.average_time_ms()), 10),
            ]);
        }
    }

    if !stats.errors.is_empty() {
        print_section("Errors");
        for (kind, count) in &stats.errors {
            print_field(kind, &count.to_string());
        }
    }

    print_section("Circuit breakers");
    for breaker in orchestrator.coordinator().breakers().all_stats() {
        print_field(
            &breaker.name,
            &format!(
                "{} (calls {}, failures {}, rejected {})",
                breaker.state, breaker.total_calls, breaker.total_failures, breaker.total_rejected
            ),
        );
    }

    Ok(())
}
