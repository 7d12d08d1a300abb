//! Command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};

/// Foreman - workflow orchestration engine for multi-phase development
/// work driven by external executor agents.
#[derive(Parser)]
#[command(name = "foreman", version, about)]
pub struct Cli {
    /// Emit machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a configuration file (defaults to .foreman/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full five-phase workflow for a project
    Run(commands::RunArgs),
    /// Run the planning phase only and print the plan
    Plan(commands::PlanArgs),
    /// Print or check the effective configuration
    Config(commands::ConfigArgs),
}

/// Render an error and exit nonzero.
pub fn handle_error(err: anyhow::Error, json: bool) {
    if json {
        let payload = serde_json::json!({ "error": format!("{err:#}") });
        eprintln!("{payload}");
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
