//! `testrig clean`: remove databases left behind by aborted runs.
//!
//! A run that is killed before disposing its pool leaves `testrig_*`
//! database, snapshot and journal files in the database directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use testrig_common::config::TestRigConfig;
use testrig_sqlite::naming;

use crate::output;

/// Arguments for the `clean` command.
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Directory to clean instead of the configured one.
    #[arg(long)]
    pub directory: Option<PathBuf>,

    /// List the files without removing them.
    #[arg(long)]
    pub dry_run: bool,
}

/// Returns the generated files in `directory`, sorted by name.
///
/// A missing directory holds nothing.
fn leftover_files(directory: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", directory.display()));
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read {}", directory.display()))?;
        let is_file = entry.file_type().is_ok_and(|t| t.is_file());
        if is_file && naming::is_generated_file(&entry.file_name().to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Executes the `clean` command.
///
/// # Errors
///
/// Returns an error if the directory cannot be read. Files that cannot be
/// removed are reported and counted, not fatal.
pub fn execute(args: &CleanArgs, config: &TestRigConfig) -> anyhow::Result<()> {
    let directory = args
        .directory
        .clone()
        .unwrap_or_else(|| config.sqlite.resolved_directory());
    let files = leftover_files(&directory)?;

    if files.is_empty() {
        println!("Nothing to clean in {}.", directory.display());
        return Ok(());
    }

    let mut removed = 0;
    for file in &files {
        if args.dry_run {
            println!("  would remove {}", file.display());
            continue;
        }
        match std::fs::remove_file(file) {
            Ok(()) => {
                removed += 1;
                println!("  removed {}", file.display());
            }
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "failed to remove leftover file");
            }
        }
    }

    if args.dry_run {
        println!("{} would be removed.", output::count_label(files.len(), "file"));
    } else {
        println!(
            "Removed {} of {}.",
            removed,
            output::count_label(files.len(), "file")
        );
    }
    Ok(())
}
