//! CLI command implementations. Thin wrappers: load config, build the
//! run context, call the engine, render the outcome.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::agents::{AgentRegistry, MockAgent, MockResponse, SubprocessAgent};
use crate::domain::models::{Config, WorkflowRecord};
use crate::infrastructure::config::ConfigLoader;
use crate::services::context::RunContext;
use crate::services::graph::{GraphDriver, RunOutcome, Terminal};
use crate::services::workflow::build_default_graph;

#[derive(Args)]
pub struct RunArgs {
    /// Project name for the workflow record
    #[arg(long)]
    pub project: String,

    /// Use scripted mock agents instead of the executor CLI
    #[arg(long)]
    pub mock: bool,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Project name for the workflow record
    #[arg(long)]
    pub project: String,

    /// Use scripted mock agents instead of the executor CLI
    #[arg(long)]
    pub mock: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Validate only; exit nonzero on an invalid configuration
    #[arg(long)]
    pub check: bool,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Register agents for every role the default graph uses.
async fn build_agents(config: &Config, mock: bool) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    if mock {
        let planner = MockAgent::new();
        planner
            .respond_when(
                "plan",
                MockResponse::success_json(json!({
                    "milestones": ["demo"],
                    "tasks": [
                        {
                            "id": "task-1",
                            "title": "Scaffold the project",
                            "priority": "high",
                            "milestone": "demo",
                            "files_to_create": ["src/lib.rs"]
                        },
                        {
                            "id": "task-2",
                            "title": "Add a smoke test",
                            "depends_on": ["task-1"],
                            "milestone": "demo",
                            "files_to_create": ["tests/smoke.rs"]
                        }
                    ]
                })),
            )
            .await;
        registry.register("planner", Arc::new(planner));
        registry.register_for_roles(&["reviewer", "executor", "fixer"], Arc::new(MockAgent::new()));
    } else {
        let agent: Arc<SubprocessAgent> = Arc::new(SubprocessAgent::new(config.agent.clone()));
        registry.register_for_roles(&["planner", "reviewer", "executor", "fixer"], agent);
    }
    registry
}

fn render_outcome(outcome: &RunOutcome, json_output: bool) -> Result<()> {
    if json_output {
        let payload = json!({
            "terminal": match outcome.terminal {
                Terminal::Completed => "completed",
                Terminal::Escalated => "escalated",
                Terminal::Aborted => "aborted",
            },
            "steps_executed": outcome.steps_executed,
            "record": &outcome.record,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "Run {:?} after {} step(s): project {}, phase {}",
            outcome.terminal, outcome.steps_executed, outcome.record.project, outcome.record.current_phase
        );
        for error in &outcome.record.error_log {
            println!(
                "  [{}] {}: {}",
                error.kind.as_str(),
                error.source_step,
                error.message
            );
        }
    }
    Ok(())
}

pub async fn run(args: RunArgs, config_path: Option<&str>, json_output: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let agents = build_agents(&config, args.mock).await;
    let step_timeout = Duration::from_secs(config.step_timeout_secs);
    let conflict_threshold = config.conflict_attempt_threshold;
    let ctx = RunContext::new(config, agents);

    let graph = build_default_graph().context("Failed to build the orchestration graph")?;
    let driver = GraphDriver::new(graph, step_timeout, conflict_threshold);

    let record = WorkflowRecord::with_phase_max_attempts(&args.project, ctx.config.phase_max_attempts);
    let outcome = driver.run(record, &ctx).await;
    render_outcome(&outcome, json_output)?;

    if outcome.terminal != Terminal::Completed {
        anyhow::bail!("run did not complete: {:?}", outcome.terminal);
    }
    Ok(())
}

pub async fn plan(args: PlanArgs, config_path: Option<&str>, json_output: bool) -> Result<()> {
    use crate::services::graph::{OrchestrationGraph, Transition};
    use crate::services::workflow::PlanStep;

    let config = load_config(config_path)?;
    let agents = build_agents(&config, args.mock).await;
    let step_timeout = Duration::from_secs(config.step_timeout_secs);
    let conflict_threshold = config.conflict_attempt_threshold;
    let ctx = RunContext::new(config, agents);

    let graph = OrchestrationGraph::builder("plan")
        .step(Arc::new(PlanStep))
        .route("plan", &[], Arc::new(|_| Transition::End))
        .build()
        .context("Failed to build the planning graph")?;
    let driver = GraphDriver::new(graph, step_timeout, conflict_threshold);

    let record = WorkflowRecord::with_phase_max_attempts(&args.project, ctx.config.phase_max_attempts);
    let outcome = driver.run(record, &ctx).await;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "plan": outcome.record.plan }))?
        );
    } else {
        match &outcome.record.plan {
            Some(plan) => println!("{plan}"),
            None => println!("No plan produced"),
        }
    }
    Ok(())
}

pub async fn config(args: ConfigArgs, config_path: Option<&str>, json_output: bool) -> Result<()> {
    let config = load_config(config_path)?;
    if args.check {
        println!("Configuration OK");
        return Ok(());
    }
    if json_output {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}
