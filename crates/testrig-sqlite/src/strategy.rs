//! The reset strategy contract and the provisioning shared by both
//! strategies.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use testrig_common::types::ResetStrategy;

use crate::error::{DatabaseError, Result};
use crate::global::GlobalData;
use crate::overrides::TransactionOverride;
use crate::schema::{DatabaseSchema, apply_migrations};
use crate::session::{DbSession, SessionFactory, open_connection};

/// Engine returning a provisioned database to its post-seed state.
#[async_trait]
pub trait DatabaseResetStrategy: Send + Sync {
    /// Returns which strategy this is.
    fn kind(&self) -> ResetStrategy;

    /// Returns the database file.
    fn database_file(&self) -> &Path;

    /// Returns the factory sessions are created from.
    fn session_factory(&self) -> Arc<SessionFactory>;

    /// Returns the savepoint stack of the ambient transaction, if any.
    fn transaction_override(&self) -> Option<Arc<TransactionOverride>> {
        None
    }

    /// Restores the post-seed state.
    ///
    /// # Errors
    ///
    /// Returns the SQL or I/O failure that prevented the restore.
    async fn reset(&self) -> Result<()>;

    /// Drops the database and every artifact created for it.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later steps still run.
    async fn dispose(&self) -> Result<()>;
}

/// Creates the database file, migrates it and runs the seed hook.
///
/// Returns the open connection used for seeding and the data the seed hook
/// recorded.
pub(crate) async fn provision<S: DatabaseSchema>(
    schema: &S,
    database_file: &Path,
    busy_timeout: Duration,
) -> testrig_common::error::Result<(tokio_rusqlite::Connection, GlobalData)> {
    let started = Instant::now();
    if let Some(parent) = database_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let conn = open_connection(database_file, busy_timeout).await?;
    let applied = conn
        .call(|c| apply_migrations(c, S::MIGRATIONS).map_err(tokio_rusqlite::Error::from))
        .await
        .map_err(DatabaseError::from)?;

    let session = DbSession::seeding(conn.clone());
    let mut globals = GlobalData::new();
    schema.seed(&session, &mut globals).await?;

    tracing::debug!(
        schema = S::NAME,
        file = %database_file.display(),
        migrations = applied,
        globals = globals.len(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "database seeded"
    );
    Ok((conn, globals))
}

/// Removes `path`, treating a missing file as success.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DatabaseError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Removes every file in `paths`, returning the first failure after trying
/// them all.
pub(crate) async fn remove_all(paths: &[&Path]) -> Result<()> {
    let mut first_error = None;
    for path in paths {
        if let Err(e) = remove_if_exists(path).await {
            tracing::warn!(file = %path.display(), error = %e, "failed to remove database file");
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
