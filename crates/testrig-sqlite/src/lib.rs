//! # testrig-sqlite
//!
//! SQLite database component for testrig environments.
//!
//! Each component provisions a temporary database file, migrates and seeds
//! it once, and returns it to the seeded state on every reset, through one
//! of two strategies:
//! - **Snapshot rollback**: copies a `VACUUM INTO` snapshot back over the
//!   database after terminating every open session.
//! - **Transaction savepoint**: runs the whole test inside one ambient
//!   transaction and rolls it back to its `INITIAL` savepoint.
//!
//! Under the savepoint strategy, application transactions opened through an
//! overriding session are redirected onto nested savepoints by the
//! [`TransactionOverride`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod component;
pub mod error;
pub mod global;
pub mod keys;
pub mod naming;
pub mod overrides;
pub mod savepoint;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod strategy;

pub use component::{DatabaseComponent, SqliteDatabaseComponent};
pub use error::DatabaseError;
pub use global::GlobalData;
pub use overrides::{SavepointHandle, TransactionOverride};
pub use schema::DatabaseSchema;
pub use session::{DbSession, DbTransaction, SessionFactory};
pub use strategy::DatabaseResetStrategy;
