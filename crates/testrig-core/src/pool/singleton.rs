//! Pool holding exactly one environment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use testrig_common::error::{Result, TestRigError};
use tokio::sync::Semaphore;

use super::{EnvironmentPool, PoolKind};
use crate::environment::Environment;
use crate::registry::ComponentRegistry;

/// Environment pool for strictly sequential execution.
///
/// Renting hands out the one environment, resetting it when it was rented
/// before. A second renter waits until the environment is released.
pub struct SingletonEnvironmentPool {
    environment: Arc<Environment>,
    gate: Semaphore,
    rented: AtomicBool,
    disposed: AtomicBool,
}

impl SingletonEnvironmentPool {
    /// Creates the pool's environment from `registry`.
    #[must_use]
    pub fn new(registry: &ComponentRegistry) -> Self {
        Self {
            environment: Arc::new(registry.create_environment()),
            gate: Semaphore::new(1),
            rented: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the pool's environment.
    #[must_use]
    pub const fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Returns whether the environment is currently rented.
    #[must_use]
    pub fn is_rented(&self) -> bool {
        self.rented.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EnvironmentPool for SingletonEnvironmentPool {
    async fn initialize(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TestRigError::PoolDisposed);
        }
        self.environment.initialize().await
    }

    async fn rent(&self) -> Result<Arc<Environment>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TestRigError::PoolDisposed);
        }
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| TestRigError::PoolDisposed)?;
        if self.environment.allocation_count() > 0 {
            self.environment.reset().await?;
        }
        permit.forget();
        self.rented.store(true, Ordering::Release);
        let allocations = self.environment.increment_allocation_count();
        tracing::debug!(environment = %self.environment.id(), allocations, "environment rented");
        Ok(Arc::clone(&self.environment))
    }

    async fn release(&self, environment: Arc<Environment>) -> Result<()> {
        let id = environment.id().get();
        if !Arc::ptr_eq(&environment, &self.environment) {
            return Err(TestRigError::ForeignEnvironment { id });
        }
        if !self.rented.swap(false, Ordering::AcqRel) {
            return Err(TestRigError::EnvironmentNotRented { id });
        }
        self.gate.add_permits(1);
        tracing::debug!(environment = %self.environment.id(), "environment released");
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.gate.close();
        self.environment.dispose().await
    }

    fn size(&self) -> usize {
        1
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Singleton
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::component::Component;
    use crate::pipeline::PipelineData;

    #[derive(Default)]
    struct Counter {
        resets: AtomicUsize,
    }

    #[async_trait]
    impl Component for Counter {
        async fn initialize(&self, _data: &mut PipelineData) -> Result<()> {
            Ok(())
        }

        async fn reset(&self) -> Result<()> {
            let _ = self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn rents_the_same_environment_and_resets_after_first_use() {
        let mut registry = ComponentRegistry::new();
        let _ = registry.add::<Counter>().expect("register");
        let pool = SingletonEnvironmentPool::new(&registry);
        pool.initialize().await.expect("initialize");

        let first = pool.rent().await.expect("rent");
        let counter = first.component::<Counter>().expect("counter");
        assert_eq!(counter.resets.load(Ordering::SeqCst), 0);
        pool.release(Arc::clone(&first)).await.expect("release");

        let second = pool.rent().await.expect("rent again");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.resets.load(Ordering::SeqCst), 1);
        assert_eq!(second.allocation_count(), 2);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn second_renter_waits_for_release() {
        let registry = ComponentRegistry::new();
        let pool = Arc::new(SingletonEnvironmentPool::new(&registry));
        pool.initialize().await.expect("initialize");

        let first = pool.rent().await.expect("rent");
        assert!(pool.is_rented());
        let waiting = tokio::time::timeout(Duration::from_millis(100), pool.rent()).await;
        assert!(waiting.is_err(), "second rent completed while the environment was out");

        let renter = Arc::clone(&pool);
        let second = tokio::spawn(async move { renter.rent().await });
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        pool.release(first).await.expect("release");
        let second = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .expect("second renter woke up")
            .expect("join")
            .expect("rent");
        assert_eq!(second.allocation_count(), 2);
    }

    #[tokio::test]
    async fn releasing_without_rent_is_rejected() {
        let registry = ComponentRegistry::new();
        let pool = SingletonEnvironmentPool::new(&registry);
        pool.initialize().await.expect("initialize");
        let environment = pool.rent().await.expect("rent");
        pool.release(Arc::clone(&environment)).await.expect("release");
        let err = pool.release(environment).await.unwrap_err();
        assert!(matches!(err, TestRigError::EnvironmentNotRented { .. }));
    }

    #[tokio::test]
    async fn dispose_wakes_waiting_renters() {
        let registry = ComponentRegistry::new();
        let pool = Arc::new(SingletonEnvironmentPool::new(&registry));
        pool.initialize().await.expect("initialize");
        let _held = pool.rent().await.expect("rent");

        let renter = Arc::clone(&pool);
        let waiting = tokio::spawn(async move { renter.rent().await });
        tokio::task::yield_now().await;
        pool.dispose().await.expect("dispose");
        let outcome = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .expect("renter woke up")
            .expect("join");
        assert!(matches!(outcome, Err(TestRigError::PoolDisposed)));
    }

    #[tokio::test]
    async fn dispose_makes_pool_unusable() {
        let registry = ComponentRegistry::new();
        let pool = SingletonEnvironmentPool::new(&registry);
        pool.initialize().await.expect("initialize");
        pool.dispose().await.expect("dispose");
        assert!(pool.environment().is_disposed());
        assert!(matches!(pool.rent().await, Err(TestRigError::PoolDisposed)));
    }
}
