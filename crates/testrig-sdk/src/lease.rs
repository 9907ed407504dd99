//! Exclusive use of one environment between rent and return.

use std::sync::Arc;

use testrig_common::error::Result;
use testrig_common::types::EnvironmentId;
use testrig_core::{Environment, EnvironmentPool, PipelineData};

/// A rented environment.
///
/// Finish the lease with [`Lease::finish`]. A lease dropped unfinished is
/// returned to its pool from a background task, if a Tokio runtime is still
/// running.
pub struct Lease {
    pool: Arc<dyn EnvironmentPool>,
    environment: Arc<Environment>,
    finished: bool,
}

impl Lease {
    pub(crate) fn new(pool: Arc<dyn EnvironmentPool>, environment: Arc<Environment>) -> Self {
        Self {
            pool,
            environment,
            finished: false,
        }
    }

    /// Returns the rented environment.
    #[must_use]
    pub const fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Returns the environment identifier.
    #[must_use]
    pub fn id(&self) -> EnvironmentId {
        self.environment().id()
    }

    /// Returns the component registered as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if no component of type `T` is registered.
    pub fn component<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.environment().component::<T>()
    }

    /// Returns the one component providing interface `I`.
    ///
    /// # Errors
    ///
    /// Returns an error if none or several components provide `I`.
    pub fn component_by_interface<I>(&self) -> Result<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        self.environment().component_by_interface::<I>()
    }

    /// Returns the data published while the environment initialized.
    #[must_use]
    pub fn pipeline_data(&self) -> Option<Arc<PipelineData>> {
        self.environment().pipeline_data()
    }

    /// Returns the environment to its pool.
    ///
    /// # Errors
    ///
    /// Returns the pool's release failure.
    pub async fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.pool.release(Arc::clone(&self.environment)).await
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let environment = Arc::clone(&self.environment);
        let id = environment.id();
        tracing::warn!(environment = %id, "lease dropped without finish, returning in background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                drop(handle.spawn(async move {
                    if let Err(e) = pool.release(environment).await {
                        tracing::error!(environment = %id, error = %e, "failed to return dropped lease");
                    }
                }));
            }
            Err(_) => {
                tracing::error!(environment = %id, "no runtime to return dropped lease on");
            }
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("environment", &self.environment.id())
            .field("pool", &self.pool.kind())
            .field("finished", &self.finished)
            .finish()
    }
}
