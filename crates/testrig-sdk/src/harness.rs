//! Building, starting and shutting down a test run.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use testrig_common::config::TestRigConfig;
use testrig_common::error::{Result, TestRigError};
use testrig_core::lifetime::SingletonComponent;
use testrig_core::pool::{
    EnvironmentPool, ParallelEnvironmentPool, PoolKind, SingletonEnvironmentPool,
    hardware_parallelism,
};
use testrig_core::{Component, ComponentRegistry, Environment};
use testrig_sqlite::{DatabaseComponent, DatabaseSchema, SqliteDatabaseComponent};

use crate::lease::Lease;
use crate::plan::ExecutionPlan;

/// Collects configuration and component registrations for a run.
#[derive(Debug)]
pub struct TestRigBuilder {
    config: TestRigConfig,
    registry: ComponentRegistry,
    units_of_work: usize,
    hardware: usize,
}

impl Default for TestRigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRigBuilder {
    /// Creates a builder with default configuration and one unit of work.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: TestRigConfig::default(),
            registry: ComponentRegistry::new(),
            units_of_work: 1,
            hardware: hardware_parallelism(),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn config(mut self, config: TestRigConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads configuration from `dir` (see [`TestRigConfig::load`]).
    ///
    /// # Errors
    ///
    /// Returns the configuration error.
    pub fn load_config(mut self, dir: &Path) -> Result<Self> {
        self.config = TestRigConfig::load(dir)?;
        Ok(self)
    }

    /// Declares how many units of work (test classes, suites) will rent
    /// environments.
    #[must_use]
    pub const fn units_of_work(mut self, units: usize) -> Self {
        self.units_of_work = units;
        self
    }

    /// Overrides the detected hardware parallelism.
    #[must_use]
    pub const fn hardware_parallelism(mut self, workers: usize) -> Self {
        self.hardware = workers;
        self
    }

    /// Returns the configuration in effect.
    #[must_use]
    pub const fn current_config(&self) -> &TestRigConfig {
        &self.config
    }

    /// Registers a component shared by every environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` is already registered.
    pub fn add_singleton<T: Component>(mut self, instance: T) -> Result<Self> {
        let _ = self.registry.add_singleton(instance)?;
        Ok(self)
    }

    /// Registers a component built once per environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` is already registered.
    pub fn add_transient<T, F>(mut self, factory: F) -> Result<Self>
    where
        T: Component,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let _ = self.registry.add_transient(factory)?;
        Ok(self)
    }

    /// Registers a per-environment SQLite database for `schema`, using the
    /// builder's SQLite configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a database for `S` is already registered.
    pub fn add_database<S: DatabaseSchema + Clone>(mut self, schema: S) -> Result<Self> {
        let config = self.config.sqlite.clone();
        let _ = self
            .registry
            .add_transient(move || SqliteDatabaseComponent::new(schema.clone(), config.clone()))?
            .provides::<dyn DatabaseComponent>(|c| c);
        Ok(self)
    }

    /// Registers one SQLite database for `schema` shared by every
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a database for `S` is already registered.
    pub fn add_shared_database<S: DatabaseSchema>(mut self, schema: S) -> Result<Self> {
        let component = SqliteDatabaseComponent::new(schema, self.config.sqlite.clone());
        let _ = self
            .registry
            .add_singleton(component)?
            .provides::<dyn DatabaseComponent>(|c| c);
        Ok(self)
    }

    /// Gives direct access to the registry, for capability declarations.
    ///
    /// # Errors
    ///
    /// Returns the error raised by `register`.
    pub fn register<F>(mut self, register: F) -> Result<Self>
    where
        F: FnOnce(&mut ComponentRegistry) -> Result<()>,
    {
        register(&mut self.registry)?;
        Ok(self)
    }

    /// Plans the run, creates the pool and initializes every environment.
    ///
    /// On failure, whatever was initialized is torn down again before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns the initialization failure.
    pub async fn start(self) -> Result<TestRig> {
        let started = Instant::now();
        let plan = ExecutionPlan::decide(&self.config.pool, self.units_of_work, self.hardware);
        let pool: Arc<dyn EnvironmentPool> = match plan.kind {
            PoolKind::Singleton => Arc::new(SingletonEnvironmentPool::new(&self.registry)),
            PoolKind::Parallel => Arc::new(ParallelEnvironmentPool::new(
                &self.registry,
                plan.environments,
            )),
        };

        let rig = TestRig {
            plan,
            pool,
            singletons: self.registry.singletons(),
            shut_down: AtomicBool::new(false),
        };

        if let Err(e) = rig.pool.initialize().await {
            tracing::error!(error = %e, "test run failed to start");
            if let Err(teardown) = rig.shutdown().await {
                tracing::warn!(error = %teardown, "teardown after failed start also failed");
            }
            return Err(e);
        }

        tracing::info!(
            plan = %rig.plan,
            components = self.registry.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "test run started"
        );
        Ok(rig)
    }
}

/// A started run: a pool of initialized environments.
pub struct TestRig {
    plan: ExecutionPlan,
    pool: Arc<dyn EnvironmentPool>,
    singletons: Vec<Arc<SingletonComponent>>,
    shut_down: AtomicBool,
}

impl TestRig {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> TestRigBuilder {
        TestRigBuilder::new()
    }

    /// Returns the plan the run was started with.
    #[must_use]
    pub const fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Returns the pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn EnvironmentPool> {
        &self.pool
    }

    /// Rents an environment, waiting until one is free.
    ///
    /// # Errors
    ///
    /// Returns the reset failure or a disposed-pool error.
    pub async fn rent(&self) -> Result<Lease> {
        let environment = self.pool.rent().await?;
        Ok(Lease::new(Arc::clone(&self.pool), environment))
    }

    /// Rents an environment, runs `body` against it and returns it to the
    /// pool, even when `body` fails or panics.
    ///
    /// A panic in `body` is resumed after the environment is returned.
    ///
    /// # Errors
    ///
    /// Returns the rent failure, the error of `body`, or the release
    /// failure, in that order of precedence.
    pub async fn run<F, Fut, T>(&self, body: F) -> Result<T>
    where
        F: FnOnce(Arc<Environment>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let environment = self.pool.rent().await?;
        let outcome = tokio::spawn(body(Arc::clone(&environment))).await;
        let released = self.pool.release(environment).await;
        match outcome {
            Ok(result) => {
                let value = result?;
                released?;
                Ok(value)
            }
            Err(join_error) => {
                if let Err(e) = released {
                    tracing::error!(error = %e, "failed to return environment after failed body");
                }
                match join_error.try_into_panic() {
                    Ok(payload) => std::panic::resume_unwind(payload),
                    Err(cancelled) => Err(TestRigError::component(cancelled)),
                }
            }
        }
    }

    /// Disposes the pool, then every singleton component in reverse
    /// registration order. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns every disposal failure.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let started = Instant::now();
        let mut errors = Vec::new();
        if let Err(e) = self.pool.dispose().await {
            errors.push(e);
        }
        for singleton in self.singletons.iter().rev() {
            if let Err(e) = singleton.dispose().await {
                tracing::warn!(error = %e, "singleton disposal failed");
                errors.push(e);
            }
        }
        tracing::info!(
            failures = errors.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "test run shut down"
        );
        TestRigError::aggregate(errors).map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for TestRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRig")
            .field("plan", &self.plan)
            .field("environments", &self.pool.size())
            .field("singletons", &self.singletons.len())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}
