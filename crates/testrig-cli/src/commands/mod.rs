//! CLI command definitions and dispatch.

pub mod clean;
pub mod config;
pub mod plan;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use testrig_common::config::TestRigConfig;
use testrig_common::constants::CONFIG_ENVIRONMENT_VAR;

/// testrig: pooled, resettable test environments.
#[derive(Parser, Debug)]
#[command(name = "testrig", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding `testrig.json` and its overlays.
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    /// Overlay to apply (`testrig.{name}.json`).
    #[arg(long, global = true, env = CONFIG_ENVIRONMENT_VAR)]
    pub environment: Option<String>,

    /// Emit log events as JSON.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show which pool strategy and how many environments a run would use.
    Plan(plan::PlanArgs),
    /// Load, validate and print the effective configuration.
    Config(config::ConfigArgs),
    /// Remove database and snapshot files left behind by aborted runs.
    Clean(clean::CleanArgs),
}

/// Loads the configuration selected by the global options.
///
/// # Errors
///
/// Returns an error if a configuration file is unreadable or invalid.
pub fn load_config(dir: &Path, environment: Option<&str>) -> anyhow::Result<TestRigConfig> {
    TestRigConfig::load_for(dir, environment)
        .with_context(|| format!("failed to load configuration from {}", dir.display()))
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config_dir, cli.environment.as_deref())?;
    tracing::debug!(
        dir = %cli.config_dir.display(),
        environment = cli.environment.as_deref().unwrap_or("-"),
        "configuration loaded"
    );
    match cli.command {
        Command::Plan(args) => plan::execute(&args, &config),
        Command::Config(args) => config::execute(&args, &config),
        Command::Clean(args) => clean::execute(&args, &config),
    }
}
