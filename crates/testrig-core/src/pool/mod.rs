//! Distribution of environments to concurrent or sequential callers.
//!
//! Two strategies exist:
//! - [`SingletonEnvironmentPool`]: exactly one environment, all work
//!   serialized against it.
//! - [`ParallelEnvironmentPool`]: N environments behind a bounded queue.

mod parallel;
mod singleton;

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use testrig_common::error::Result;

use crate::environment::Environment;

pub use parallel::ParallelEnvironmentPool;
pub use singleton::SingletonEnvironmentPool;

/// Allocator and recycler of environments.
///
/// Callers must run [`EnvironmentPool::initialize`] before the first rent.
#[async_trait]
pub trait EnvironmentPool: Send + Sync {
    /// Initializes every environment of the pool.
    ///
    /// # Errors
    ///
    /// Returns the initialization failures of the environments.
    async fn initialize(&self) -> Result<()>;

    /// Hands out an environment, waiting until one is free.
    ///
    /// The environment is reset first unless this is its first rent.
    ///
    /// # Errors
    ///
    /// Returns the reset failure, or
    /// [`TestRigError::PoolDisposed`](testrig_common::error::TestRigError::PoolDisposed)
    /// once the pool is disposed.
    async fn rent(&self) -> Result<Arc<Environment>>;

    /// Returns a rented environment to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment belongs to another pool or is
    /// not currently rented.
    async fn release(&self, environment: Arc<Environment>) -> Result<()>;

    /// Disposes every environment; the pool is unusable afterwards.
    ///
    /// # Errors
    ///
    /// Returns every disposal failure.
    async fn dispose(&self) -> Result<()>;

    /// Returns the number of environments owned by the pool.
    fn size(&self) -> usize;

    /// Returns the pool strategy.
    fn kind(&self) -> PoolKind;
}

/// Environment pool strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// One environment, strictly serialized.
    Singleton,
    /// Several environments behind a bounded queue.
    Parallel,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => write!(f, "singleton"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// Returns how many workers the machine can usefully run.
#[must_use]
pub fn hardware_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Computes the number of environments for a parallel pool.
///
/// The result is `min(max_parallelism, units_of_work, hardware)`, and
/// never less than one.
#[must_use]
pub fn environment_count(
    max_parallelism: Option<usize>,
    units_of_work: usize,
    hardware: usize,
) -> usize {
    max_parallelism
        .unwrap_or(usize::MAX)
        .min(units_of_work)
        .min(hardware)
        .max(1)
}
