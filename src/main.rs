//! Foreman CLI entry point.

use clap::Parser;

use foreman::cli::{commands, handle_error, Cli, Commands};
use foreman::domain::models::LoggingConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging first; fall back to defaults if config loading fails so
    // the failure itself is visible.
    let logging = foreman::infrastructure::config::ConfigLoader::load()
        .map(|c| c.logging)
        .unwrap_or_else(|_| LoggingConfig::default());
    foreman::infrastructure::logging::init(&logging);

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => commands::run(args, config_path, cli.json).await,
        Commands::Plan(args) => commands::plan(args, config_path, cli.json).await,
        Commands::Config(args) => commands::config(args, config_path, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
