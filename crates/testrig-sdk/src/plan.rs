//! Selection between the singleton and parallel pool strategies.

use std::fmt;

use testrig_common::config::PoolConfig;
use testrig_core::pool::{PoolKind, environment_count};

/// Why a run was planned to execute sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequentialReason {
    /// `pool.disable_parallelization` is set.
    ParallelizationDisabled,
    /// `pool.max_parallelism` is 1.
    MaxParallelismOne,
    /// There is at most one unit of work.
    SingleUnitOfWork,
}

impl fmt::Display for SequentialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParallelizationDisabled => write!(f, "parallelization is disabled"),
            Self::MaxParallelismOne => write!(f, "max parallelism is 1"),
            Self::SingleUnitOfWork => write!(f, "there is a single unit of work"),
        }
    }
}

/// Pool strategy and size chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Pool strategy.
    pub kind: PoolKind,
    /// Number of environments the pool will own.
    pub environments: usize,
    /// Set when the singleton strategy was chosen.
    pub sequential_reason: Option<SequentialReason>,
}

impl ExecutionPlan {
    /// Plans a run of `units_of_work` on a machine with `hardware` workers.
    #[must_use]
    pub fn decide(config: &PoolConfig, units_of_work: usize, hardware: usize) -> Self {
        let reason = if config.disable_parallelization {
            Some(SequentialReason::ParallelizationDisabled)
        } else if config.max_parallelism == Some(1) {
            Some(SequentialReason::MaxParallelismOne)
        } else if units_of_work <= 1 {
            Some(SequentialReason::SingleUnitOfWork)
        } else {
            None
        };

        let plan = match reason {
            Some(reason) => Self {
                kind: PoolKind::Singleton,
                environments: 1,
                sequential_reason: Some(reason),
            },
            None => Self {
                kind: PoolKind::Parallel,
                environments: environment_count(config.max_parallelism, units_of_work, hardware),
                sequential_reason: None,
            },
        };

        match plan.sequential_reason {
            Some(reason) => {
                tracing::info!(%reason, units_of_work, "running sequentially");
            }
            None => tracing::info!(
                environments = plan.environments,
                units_of_work,
                hardware,
                "running in parallel"
            ),
        }
        plan
    }

    /// Returns whether every unit of work runs against one environment.
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        self.kind == PoolKind::Singleton
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sequential_reason {
            Some(reason) => write!(f, "{} pool, 1 environment ({reason})", self.kind),
            None => write!(f, "{} pool, {} environments", self.kind, self.environments),
        }
    }
}
