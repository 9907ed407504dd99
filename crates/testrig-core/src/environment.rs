//! A rentable, ordered set of initialized components.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use testrig_common::error::{Result, TestRigError};
use testrig_common::types::EnvironmentId;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::lifetime::DecoratedComponent;
use crate::pipeline::PipelineData;
use crate::registry::Slot;

static NEXT_ENVIRONMENT_ID: AtomicU32 = AtomicU32::new(1);

/// An ordered collection of decorated components with an identity and an
/// allocation counter.
///
/// Environments are created by [`ComponentRegistry::create_environment`]
/// and driven by a pool: initialized once, reset before every rent after
/// the first, disposed once at shutdown.
///
/// [`ComponentRegistry::create_environment`]: crate::registry::ComponentRegistry::create_environment
pub struct Environment {
    id: EnvironmentId,
    slots: Vec<Slot>,
    allocation_count: AtomicUsize,
    init_gate: Mutex<()>,
    pipeline: OnceLock<Arc<PipelineData>>,
    disposed: AtomicBool,
}

impl Environment {
    pub(crate) fn new(slots: Vec<Slot>) -> Self {
        Self {
            id: EnvironmentId::new(NEXT_ENVIRONMENT_ID.fetch_add(1, Ordering::Relaxed)),
            slots,
            allocation_count: AtomicUsize::new(0),
            init_gate: Mutex::new(()),
            pipeline: OnceLock::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the process-unique identifier.
    #[must_use]
    pub const fn id(&self) -> EnvironmentId {
        self.id
    }

    /// Returns how many times this environment has been rented.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count.load(Ordering::Acquire)
    }

    /// Records one more rent and returns the new count.
    pub fn increment_allocation_count(&self) -> usize {
        self.allocation_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns whether [`Environment::initialize`] has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.pipeline.get().is_some()
    }

    /// Returns whether [`Environment::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns whether the environment holds no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the data components published during initialization.
    #[must_use]
    pub fn pipeline_data(&self) -> Option<Arc<PipelineData>> {
        self.pipeline.get().cloned()
    }

    /// Initializes every component sequentially, in registration order.
    ///
    /// A fresh [`PipelineData`] carrying the environment id is threaded
    /// through every call. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first component failure unchanged; later components are
    /// not initialized. Returns [`TestRigError::ComponentDisposed`] if the
    /// environment has been disposed.
    pub async fn initialize(&self) -> Result<()> {
        let _gate = self.init_gate.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        if self.is_disposed() {
            return Err(TestRigError::ComponentDisposed {
                component: "Environment",
            });
        }

        let started = Instant::now();
        let mut data = PipelineData::for_environment(self.id);
        for slot in &self.slots {
            tracing::debug!(environment = %self.id, component = slot.type_name, "initializing component");
            slot.decorated.initialize(&mut data).await?;
        }
        let _ = self.pipeline.set(Arc::new(data));

        tracing::info!(
            environment = %self.id,
            components = self.slots.len(),
            elapsed_ms = elapsed_ms(started),
            "environment initialized"
        );
        Ok(())
    }

    /// Resets every component concurrently.
    ///
    /// All resets run to completion even when some fail.
    ///
    /// # Errors
    ///
    /// Returns the single failure unchanged, or
    /// [`TestRigError::Multiple`] with every failure when several
    /// components fail.
    pub async fn reset(&self) -> Result<()> {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for slot in &self.slots {
            let component = Arc::clone(&slot.decorated);
            let _ = tasks.spawn(async move { component.reset().await });
        }

        let errors = settle(tasks).await;

        if let Some(err) = TestRigError::aggregate(errors) {
            tracing::error!(environment = %self.id, error = %err, "environment reset failed");
            return Err(err);
        }
        tracing::info!(
            environment = %self.id,
            elapsed_ms = elapsed_ms(started),
            "environment reset"
        );
        Ok(())
    }

    /// Returns the undecorated component of concrete type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::ComponentNotRegistered`] if no component of
    /// that type exists.
    pub fn component<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let type_id = TypeId::of::<T>();
        self.slots
            .iter()
            .find(|s| s.type_id == type_id)
            .and_then(|s| Arc::clone(&s.instance).downcast::<T>().ok())
            .ok_or(TestRigError::ComponentNotRegistered {
                component: std::any::type_name::<T>(),
            })
    }

    /// Returns the single component providing interface `I`.
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::ComponentNotRegistered`] if no component
    /// provides `I`, or [`TestRigError::AmbiguousComponent`] if more than
    /// one does.
    pub fn component_by_interface<I>(&self) -> Result<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let interface = TypeId::of::<I>();
        let interface_name = std::any::type_name::<I>();
        let mut matches = self.slots.iter().flat_map(|slot| {
            slot.capabilities
                .iter()
                .filter(move |c| c.interface == interface)
                .map(move |c| (slot, c))
        });

        let Some((slot, capability)) = matches.next() else {
            return Err(TestRigError::ComponentNotRegistered {
                component: interface_name,
            });
        };
        let others = matches.count();
        if others > 0 {
            return Err(TestRigError::AmbiguousComponent {
                interface: interface_name,
                count: others + 1,
            });
        }

        (capability.cast)(&slot.instance)
            .and_then(|boxed| boxed.downcast::<Arc<I>>().ok())
            .map(|arc| *arc)
            .ok_or(TestRigError::ComponentNotRegistered {
                component: capability.interface_name,
            })
    }

    /// Disposes every transient component in reverse registration order.
    ///
    /// Singleton components are skipped: they outlive the environment and
    /// are disposed once by their owner. Only the first call does any work.
    ///
    /// # Errors
    ///
    /// Every component is attempted; the failures are returned together.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let started = Instant::now();

        let mut errors = Vec::new();
        for slot in self.slots.iter().rev() {
            if slot.decorated.is_singleton() {
                continue;
            }
            if let Err(e) = slot.decorated.dispose().await {
                tracing::warn!(
                    environment = %self.id,
                    component = slot.decorated.type_name(),
                    error = %e,
                    "component dispose failed"
                );
                errors.push(e);
            }
        }

        tracing::info!(
            environment = %self.id,
            elapsed_ms = elapsed_ms(started),
            "environment disposed"
        );
        TestRigError::aggregate(errors).map_or(Ok(()), Err)
    }
}

/// Waits for every task and returns the failures in completion order.
///
/// A panicking task resumes its panic on the caller.
pub(crate) async fn settle(mut tasks: JoinSet<Result<()>>) -> Vec<TestRigError> {
    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => errors.push(e),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => errors.push(TestRigError::component(e)),
        }
    }
    errors
}

/// Milliseconds since `started`, saturating.
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("components", &self.slots.iter().map(|s| s.type_name).collect::<Vec<_>>())
            .field("allocation_count", &self.allocation_count())
            .field("initialized", &self.is_initialized())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::component::Component;
    use crate::registry::ComponentRegistry;

    type Journal = Arc<StdMutex<Vec<String>>>;

    struct Recorder<const N: usize> {
        journal: Journal,
        fail_reset: bool,
    }

    impl<const N: usize> Recorder<N> {
        fn new(journal: &Journal) -> Self {
            Self {
                journal: Arc::clone(journal),
                fail_reset: false,
            }
        }

        fn log(&self, event: &str) {
            self.journal
                .lock()
                .expect("journal")
                .push(format!("{event}:{N}"));
        }
    }

    #[async_trait]
    impl<const N: usize> Component for Recorder<N> {
        async fn initialize(&self, data: &mut PipelineData) -> Result<()> {
            self.log("init");
            data.upsert(format!("seen_{N}"), true);
            Ok(())
        }

        async fn reset(&self) -> Result<()> {
            self.log("reset");
            if self.fail_reset {
                return Err(TestRigError::Config {
                    message: format!("reset {N} failed"),
                });
            }
            Ok(())
        }

        async fn dispose(&self) -> Result<()> {
            self.log("dispose");
            Ok(())
        }
    }

    fn events(journal: &Journal, prefix: &str) -> Vec<String> {
        journal
            .lock()
            .expect("journal")
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn initialize_runs_in_registration_order_once() {
        let journal = Journal::default();
        let mut registry = ComponentRegistry::new();
        let j = Arc::clone(&journal);
        let _ = registry.add_transient(move || Recorder::<1>::new(&j)).expect("1");
        let j = Arc::clone(&journal);
        let _ = registry.add_transient(move || Recorder::<2>::new(&j)).expect("2");

        let environment = registry.create_environment();
        environment.initialize().await.expect("initialize");
        environment.initialize().await.expect("initialize again");

        assert_eq!(events(&journal, "init"), vec!["init:1", "init:2"]);
        let data = environment.pipeline_data().expect("published");
        assert_eq!(data.environment_id().expect("id"), environment.id());
        assert!(data.contains_key("seen_2"));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let registry = ComponentRegistry::new();
        let a = registry.create_environment();
        let b = registry.create_environment();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn dispose_runs_in_reverse_and_skips_singletons() {
        let journal = Journal::default();
        let mut registry = ComponentRegistry::new();
        let j = Arc::clone(&journal);
        let _ = registry.add_transient(move || Recorder::<1>::new(&j)).expect("1");
        let _ = registry.add_singleton(Recorder::<2>::new(&journal)).expect("2");
        let j = Arc::clone(&journal);
        let _ = registry.add_transient(move || Recorder::<3>::new(&j)).expect("3");

        let environment = registry.create_environment();
        environment.dispose().await.expect("dispose");
        environment.dispose().await.expect("dispose again");

        assert_eq!(events(&journal, "dispose"), vec!["dispose:3", "dispose:1"]);
        assert!(environment.is_disposed());
    }

    #[tokio::test]
    async fn reset_surfaces_every_failure() {
        let journal = Journal::default();
        let mut registry = ComponentRegistry::new();
        let j = Arc::clone(&journal);
        let _ = registry
            .add_transient(move || Recorder::<1> {
                fail_reset: true,
                ..Recorder::new(&j)
            })
            .expect("1");
        let j = Arc::clone(&journal);
        let _ = registry.add_transient(move || Recorder::<2>::new(&j)).expect("2");
        let j = Arc::clone(&journal);
        let _ = registry
            .add_transient(move || Recorder::<3> {
                fail_reset: true,
                ..Recorder::new(&j)
            })
            .expect("3");

        let environment = registry.create_environment();
        let err = environment.reset().await.unwrap_err();
        assert!(
            matches!(&err, TestRigError::Multiple { errors } if errors.len() == 2),
            "got: {err:?}"
        );
        assert_eq!(events(&journal, "reset").len(), 3);
    }

    #[tokio::test]
    async fn unknown_component_lookup_fails_closed() {
        let registry = ComponentRegistry::new();
        let environment = registry.create_environment();
        let err = environment.component::<String>().unwrap_err();
        assert!(matches!(err, TestRigError::ComponentNotRegistered { .. }));
    }
}
