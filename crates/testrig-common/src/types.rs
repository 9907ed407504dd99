//! Domain primitive types used across the testrig workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Process-unique identifier of an environment.
///
/// Identifiers are allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvironmentId(u32);

impl EnvironmentId {
    /// Wraps a raw identifier value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared lifetime of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifetime {
    /// One instance shared by every environment in the pool.
    Singleton,
    /// One instance per environment.
    Transient,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singleton => write!(f, "singleton"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// How a database component returns to its post-seed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStrategy {
    /// Restore the database from a point-in-time snapshot taken after seeding.
    #[default]
    SnapshotRollback,
    /// Hold one ambient transaction and roll back to its initial savepoint.
    TransactionSavepoint,
}

impl fmt::Display for ResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SnapshotRollback => write!(f, "snapshot_rollback"),
            Self::TransactionSavepoint => write!(f, "transaction_savepoint"),
        }
    }
}
