//! Pool of N environments behind a bounded queue.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use testrig_common::error::{Result, TestRigError};
use testrig_common::types::EnvironmentId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use super::{EnvironmentPool, PoolKind};
use crate::environment::{Environment, elapsed_ms, settle};
use crate::registry::ComponentRegistry;

/// Environment pool distributing N environments to concurrent renters.
///
/// The queue capacity equals the number of environments, so returning an
/// environment never waits. Environments sitting in the queue plus the
/// rented ones always make up the full set.
pub struct ParallelEnvironmentPool {
    environments: Vec<Arc<Environment>>,
    enqueued: Vec<Arc<AtomicBool>>,
    sender: mpsc::Sender<Arc<Environment>>,
    receiver: Mutex<mpsc::Receiver<Arc<Environment>>>,
    rented: StdMutex<HashSet<EnvironmentId>>,
    initialized: Mutex<bool>,
    disposed: AtomicBool,
}

impl ParallelEnvironmentPool {
    /// Creates `count` environments from `registry`; a count of zero is
    /// raised to one.
    ///
    /// A failed [`initialize`](EnvironmentPool::initialize) may be retried;
    /// environments that already reached the queue are not queued again.
    #[must_use]
    pub fn new(registry: &ComponentRegistry, count: usize) -> Self {
        let count = count.max(1);
        let environments: Vec<_> = (0..count)
            .map(|_| Arc::new(registry.create_environment()))
            .collect();
        let enqueued = (0..count).map(|_| Arc::new(AtomicBool::new(false))).collect();
        let (sender, receiver) = mpsc::channel(count);
        tracing::debug!(environments = count, "parallel pool created");
        Self {
            environments,
            enqueued,
            sender,
            receiver: Mutex::new(receiver),
            rented: StdMutex::new(HashSet::new()),
            initialized: Mutex::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the environments owned by the pool.
    #[must_use]
    pub fn environments(&self) -> &[Arc<Environment>] {
        &self.environments
    }

    /// Returns how many environments are currently rented.
    #[must_use]
    pub fn rented_count(&self) -> usize {
        self.rented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn owns(&self, environment: &Arc<Environment>) -> bool {
        self.environments.iter().any(|e| Arc::ptr_eq(e, environment))
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TestRigError::PoolDisposed);
        }
        Ok(())
    }
}

#[async_trait]
impl EnvironmentPool for ParallelEnvironmentPool {
    async fn initialize(&self) -> Result<()> {
        self.ensure_usable()?;
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }
        let started = Instant::now();

        let mut tasks = JoinSet::new();
        for (environment, enqueued) in self.environments.iter().zip(&self.enqueued) {
            if enqueued.load(Ordering::Acquire) {
                continue;
            }
            let environment = Arc::clone(environment);
            let enqueued = Arc::clone(enqueued);
            let sender = self.sender.clone();
            let _ = tasks.spawn(async move {
                environment.initialize().await?;
                sender
                    .send(environment)
                    .await
                    .map_err(|_| TestRigError::PoolDisposed)?;
                enqueued.store(true, Ordering::Release);
                Ok(())
            });
        }

        let errors = settle(tasks).await;
        if let Some(err) = TestRigError::aggregate(errors) {
            tracing::error!(error = %err, "parallel pool initialization failed");
            return Err(err);
        }

        *initialized = true;
        tracing::info!(
            environments = self.environments.len(),
            elapsed_ms = elapsed_ms(started),
            "parallel pool initialized"
        );
        Ok(())
    }

    async fn rent(&self) -> Result<Arc<Environment>> {
        self.ensure_usable()?;
        let environment = {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await.ok_or(TestRigError::PoolDisposed)?
        };

        if environment.allocation_count() > 0 {
            if let Err(e) = environment.reset().await {
                if self.sender.try_send(Arc::clone(&environment)).is_err() {
                    tracing::error!(environment = %environment.id(), "failed to requeue environment after reset failure");
                }
                return Err(e);
            }
        }

        let allocations = environment.increment_allocation_count();
        let _ = self
            .rented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(environment.id());
        tracing::debug!(environment = %environment.id(), allocations, "environment rented");
        Ok(environment)
    }

    async fn release(&self, environment: Arc<Environment>) -> Result<()> {
        let id = environment.id();
        if !self.owns(&environment) {
            return Err(TestRigError::ForeignEnvironment { id: id.get() });
        }
        let was_rented = self
            .rented
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if !was_rented {
            return Err(TestRigError::EnvironmentNotRented { id: id.get() });
        }

        match self.sender.try_send(environment) {
            Ok(()) => {
                tracing::debug!(environment = %id, "environment released");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(TestRigError::PoolDisposed),
            Err(TrySendError::Full(_)) => Err(TestRigError::EnvironmentNotRented { id: id.get() }),
        }
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let started = Instant::now();

        let mut tasks = JoinSet::new();
        for environment in &self.environments {
            let environment = Arc::clone(environment);
            let _ = tasks.spawn(async move { environment.dispose().await });
        }

        let errors = settle(tasks).await;

        tracing::info!(
            environments = self.environments.len(),
            elapsed_ms = elapsed_ms(started),
            "parallel pool disposed"
        );
        TestRigError::aggregate(errors).map_or(Ok(()), Err)
    }

    fn size(&self) -> usize {
        self.environments.len()
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Parallel
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
        fail_next_reset: AtomicBool,
    }

    #[async_trait]
    impl Component for Counter {
        async fn initialize(&self, _data: &mut PipelineData) -> Result<()> {
            Ok(())
        }

        async fn reset(&self) -> Result<()> {
            let _ = self.resets.fetch_add(1, Ordering::SeqCst);
            if self.fail_next_reset.swap(false, Ordering::SeqCst) {
                return Err(TestRigError::Config {
                    message: "reset refused".into(),
                });
            }
            Ok(())
        }

        async fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    async fn pool(count: usize) -> ParallelEnvironmentPool {
        let mut registry = ComponentRegistry::new();
        let _ = registry.add::<Counter>().expect("register");
        let pool = ParallelEnvironmentPool::new(&registry, count);
        pool.initialize().await.expect("initialize");
        pool
    }

    #[tokio::test]
    async fn first_rent_skips_reset() {
        let pool = pool(1).await;
        let environment = pool.rent().await.expect("rent");
        let counter = environment.component::<Counter>().expect("counter");
        assert_eq!(counter.resets.load(Ordering::SeqCst), 0);
        assert_eq!(environment.allocation_count(), 1);

        pool.release(environment).await.expect("release");
        let environment = pool.rent().await.expect("rent again");
        assert_eq!(counter.resets.load(Ordering::SeqCst), 1);
        assert_eq!(environment.allocation_count(), 2);
    }

    #[tokio::test]
    async fn releasing_twice_is_rejected() {
        let pool = pool(2).await;
        let environment = pool.rent().await.expect("rent");
        pool.release(Arc::clone(&environment)).await.expect("release");
        let err = pool.release(environment).await.unwrap_err();
        assert!(matches!(err, TestRigError::EnvironmentNotRented { .. }));
    }

    #[tokio::test]
    async fn foreign_environment_is_rejected() {
        let pool = pool(1).await;
        let other = Arc::new(ComponentRegistry::new().create_environment());
        let err = pool.release(other).await.unwrap_err();
        assert!(matches!(err, TestRigError::ForeignEnvironment { .. }));
    }

    #[tokio::test]
    async fn failed_reset_keeps_environment_in_pool() {
        let pool = pool(1).await;
        let environment = pool.rent().await.expect("rent");
        let counter = environment.component::<Counter>().expect("counter");
        counter.fail_next_reset.store(true, Ordering::SeqCst);
        pool.release(environment).await.expect("release");

        let _ = pool.rent().await.unwrap_err();
        assert_eq!(pool.rented_count(), 0);

        let environment = pool.rent().await.expect("rent after failure");
        assert_eq!(environment.allocation_count(), 2);
    }

    /// The second environment to start fails once.
    #[derive(Default)]
    struct FailsFirstStart;

    static FLAKY_STARTS: AtomicUsize = AtomicUsize::new(0);

    #[async_trait]
    impl Component for FailsFirstStart {
        async fn initialize(&self, _data: &mut PipelineData) -> Result<()> {
            if FLAKY_STARTS.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(TestRigError::Config {
                    message: "start refused".into(),
                });
            }
            Ok(())
        }

        async fn reset(&self) -> Result<()> {
            Ok(())
        }

        async fn dispose(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn retried_initialize_queues_each_environment_once() {
        let mut registry = ComponentRegistry::new();
        let _ = registry.add::<FailsFirstStart>().expect("register");
        let pool = ParallelEnvironmentPool::new(&registry, 2);

        assert!(pool.initialize().await.is_err());
        tokio::time::timeout(Duration::from_secs(5), pool.initialize())
            .await
            .expect("retry finished")
            .expect("retry succeeded");

        let first = pool.rent().await.expect("first rent");
        let second = pool.rent().await.expect("second rent");
        assert!(!Arc::ptr_eq(&first, &second));
        let third = tokio::time::timeout(Duration::from_millis(100), pool.rent()).await;
        assert!(third.is_err(), "an environment was queued twice");
    }

    #[tokio::test]
    async fn rent_after_dispose_fails() {
        let pool = pool(2).await;
        pool.dispose().await.expect("dispose");
        pool.dispose().await.expect("dispose again");
        let err = pool.rent().await.unwrap_err();
        assert!(matches!(err, TestRigError::PoolDisposed));
        assert!(pool.environments().iter().all(|e| e.is_disposed()));
    }
}
