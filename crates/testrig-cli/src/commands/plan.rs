//! `testrig plan`: show how a run would be distributed.

use clap::Args;
use serde::Serialize;
use testrig_common::config::TestRigConfig;
use testrig_core::pool::hardware_parallelism;
use testrig_sdk::ExecutionPlan;

use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Number of units of work (test classes, suites) that will rent
    /// environments.
    #[arg(default_value_t = 1)]
    pub units: usize,

    /// Worker count to plan for instead of the detected one.
    #[arg(long)]
    pub hardware: Option<usize>,

    /// Print the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PlanReport {
    strategy: String,
    environments: usize,
    units_of_work: usize,
    hardware_parallelism: usize,
    max_parallelism: Option<usize>,
    sequential_reason: Option<String>,
}

impl PlanReport {
    fn new(plan: &ExecutionPlan, config: &TestRigConfig, units: usize, hardware: usize) -> Self {
        Self {
            strategy: plan.kind.to_string(),
            environments: plan.environments,
            units_of_work: units,
            hardware_parallelism: hardware,
            max_parallelism: config.pool.max_parallelism,
            sequential_reason: plan.sequential_reason.map(|r| r.to_string()),
        }
    }
}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if JSON output cannot be produced.
pub fn execute(args: &PlanArgs, config: &TestRigConfig) -> anyhow::Result<()> {
    let hardware = args.hardware.unwrap_or_else(hardware_parallelism);
    let plan = ExecutionPlan::decide(&config.pool, args.units, hardware);
    let report = PlanReport::new(&plan, config, args.units, hardware);

    if args.json {
        return output::print_json(&report);
    }

    println!("Execution plan");
    println!("{}", output::rule(40));
    output::print_field("strategy", &report.strategy);
    output::print_field(
        "environments",
        &output::count_label(report.environments, "environment"),
    );
    output::print_field(
        "units of work",
        &output::count_label(report.units_of_work, "unit"),
    );
    output::print_field("hardware", &report.hardware_parallelism.to_string());
    output::print_field(
        "max parallelism",
        &report
            .max_parallelism
            .map_or_else(|| "unbounded".to_string(), |m| m.to_string()),
    );
    if let Some(reason) = &report.sequential_reason {
        output::print_field("sequential because", reason);
    }
    Ok(())
}
