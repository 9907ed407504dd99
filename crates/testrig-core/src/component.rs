//! The component lifecycle contract.
//!
//! A component is a single integration-test dependency, such as a database
//! or a hosted service. Environments drive every component through
//! `initialize`, any number of `reset`s, and a final `dispose`.

use async_trait::async_trait;
use testrig_common::error::Result;

use crate::pipeline::PipelineData;

/// A pluggable unit of test infrastructure.
///
/// Methods take `&self` because a singleton instance is shared by every
/// environment in the pool; implementations keep their mutable state behind
/// their own synchronization.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    /// Brings the component to a ready state.
    ///
    /// Components may read artifacts published by components registered
    /// before them and publish their own for later ones.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning or seeding fails. The failure is
    /// fatal for the environment.
    async fn initialize(&self, data: &mut PipelineData) -> Result<()>;

    /// Returns the component to its post-initialize state.
    ///
    /// # Errors
    ///
    /// Returns an error if the component cannot be reset.
    async fn reset(&self) -> Result<()>;

    /// Releases every resource the component holds.
    ///
    /// Disposing an already-disposed component must succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown fails.
    async fn dispose(&self) -> Result<()>;
}
