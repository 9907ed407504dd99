//! # testrig CLI
//!
//! Plans test runs, prints the effective configuration and removes
//! databases left behind by aborted runs.

#![allow(clippy::print_stdout)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use clap::Parser;
use testrig_sdk::logging::{self, LogFormat};

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    let _ = logging::init(format);
    commands::execute(cli)
}
