//! `testrig config`: print the effective configuration.

use clap::Args;
use testrig_common::config::TestRigConfig;

use crate::output;

/// Arguments for the `config` command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Only validate; print nothing on success.
    #[arg(long)]
    pub check: bool,
}

/// Executes the `config` command.
///
/// Loading already validated the configuration; this prints it as JSON
/// with the resolved database directory filled in.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn execute(args: &ConfigArgs, config: &TestRigConfig) -> anyhow::Result<()> {
    if args.check {
        tracing::info!("configuration is valid");
        return Ok(());
    }
    let mut effective = config.clone();
    effective.sqlite.directory = Some(config.sqlite.resolved_directory());
    output::print_json(&effective)
}
