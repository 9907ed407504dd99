//! Lifetime wrappers around components.
//!
//! Every registered component reaches an environment wrapped in either a
//! [`SingletonComponent`] or a [`TransientComponent`]. Both implement
//! [`Component`] so environments drive them uniformly, and both expose the
//! undecorated instance through [`DecoratedComponent::inner`].

use std::sync::Arc;

use async_trait::async_trait;
use testrig_common::error::{Result, TestRigError};
use testrig_common::types::Lifetime;
use tokio::sync::Mutex;

use crate::component::Component;
use crate::pipeline::PipelineData;

/// A component wrapped with its declared lifetime.
pub trait DecoratedComponent: Component {
    /// Returns the undecorated component.
    fn inner(&self) -> &Arc<dyn Component>;

    /// Returns the declared lifetime.
    fn lifetime(&self) -> Lifetime;

    /// Returns whether the component is shared by every environment.
    fn is_singleton(&self) -> bool {
        self.lifetime() == Lifetime::Singleton
    }

    /// Returns the concrete component type name, for diagnostics.
    fn type_name(&self) -> &'static str;
}

/// Wrapper for a component shared by every environment in the pool.
///
/// `initialize` runs under a mutual-exclusion gate so concurrently
/// initializing environments take turns on the shared instance. `reset` is a
/// no-op: singleton state persists across every test. `dispose` takes the
/// same gate and closes it; disposing a closed gate succeeds.
pub struct SingletonComponent {
    inner: Arc<dyn Component>,
    type_name: &'static str,
    gate: Mutex<GateState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Open,
    Closed,
}

impl SingletonComponent {
    /// Wraps `inner` with singleton semantics.
    #[must_use]
    pub fn new(inner: Arc<dyn Component>, type_name: &'static str) -> Self {
        Self {
            inner,
            type_name,
            gate: Mutex::new(GateState::Open),
        }
    }
}

#[async_trait]
impl Component for SingletonComponent {
    async fn initialize(&self, data: &mut PipelineData) -> Result<()> {
        let gate = self.gate.lock().await;
        if *gate == GateState::Closed {
            return Err(TestRigError::ComponentDisposed {
                component: self.type_name,
            });
        }
        self.inner.initialize(data).await
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        let mut gate = self.gate.lock().await;
        if *gate == GateState::Closed {
            tracing::debug!(component = self.type_name, "singleton already disposed");
            return Ok(());
        }
        *gate = GateState::Closed;
        self.inner.dispose().await
    }
}

impl DecoratedComponent for SingletonComponent {
    fn inner(&self) -> &Arc<dyn Component> {
        &self.inner
    }

    fn lifetime(&self) -> Lifetime {
        Lifetime::Singleton
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Wrapper for a component owned by exactly one environment.
///
/// Every call passes straight through; no cross-environment sharing means
/// no locking.
pub struct TransientComponent {
    inner: Arc<dyn Component>,
    type_name: &'static str,
}

impl TransientComponent {
    /// Wraps `inner` with transient semantics.
    #[must_use]
    pub fn new(inner: Arc<dyn Component>, type_name: &'static str) -> Self {
        Self { inner, type_name }
    }
}

#[async_trait]
impl Component for TransientComponent {
    async fn initialize(&self, data: &mut PipelineData) -> Result<()> {
        self.inner.initialize(data).await
    }

    async fn reset(&self) -> Result<()> {
        self.inner.reset().await
    }

    async fn dispose(&self) -> Result<()> {
        self.inner.dispose().await
    }
}

impl DecoratedComponent for TransientComponent {
    fn inner(&self) -> &Arc<dyn Component> {
        &self.inner
    }

    fn lifetime(&self) -> Lifetime {
        Lifetime::Transient
    }

    fn type_name(&self) -> &'static str {
        self.type_name
    }
}
