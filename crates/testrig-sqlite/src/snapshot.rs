//! Reset by restoring a point-in-time copy of the seeded database.
//!
//! After seeding, `VACUUM INTO` writes a compact copy of the database next
//! to it as `{db}_init`. A reset terminates every session the factory
//! handed out and copies the snapshot back over the database file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use testrig_common::types::ResetStrategy;

use crate::error::{DatabaseError, Result};
use crate::global::GlobalData;
use crate::naming;
use crate::schema::DatabaseSchema;
use crate::session::{SessionFactory, SessionRegistry};
use crate::strategy::{DatabaseResetStrategy, provision, remove_all, remove_if_exists};

/// Snapshot rollback strategy for one provisioned database.
pub struct SnapshotRollback {
    name: String,
    database_file: PathBuf,
    snapshot_file: PathBuf,
    sessions: Arc<SessionRegistry>,
    factory: Arc<SessionFactory>,
}

impl SnapshotRollback {
    /// Provisions and seeds database `name` in `directory`, then writes its
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns the migration, seed or snapshot failure.
    pub async fn initialize<S: DatabaseSchema>(
        schema: &S,
        name: &str,
        directory: &Path,
        busy_timeout: Duration,
    ) -> testrig_common::error::Result<(Self, GlobalData)> {
        let database_file = naming::database_file(directory, name);
        let snapshot_file = naming::database_file(directory, &naming::snapshot_name(name));

        let (conn, globals) = provision(schema, &database_file, busy_timeout).await?;
        let target = snapshot_file.to_string_lossy().replace('\'', "''");
        conn.call(move |c| {
            c.execute_batch(&format!("VACUUM INTO '{target}'"))?;
            Ok(())
        })
        .await
        .map_err(DatabaseError::from)?;
        conn.close().await.map_err(DatabaseError::from)?;

        tracing::info!(
            database = %name,
            snapshot = %snapshot_file.display(),
            "database snapshot created"
        );

        let sessions = Arc::new(SessionRegistry::default());
        let factory = Arc::new(SessionFactory::dedicated(
            &database_file,
            busy_timeout,
            Arc::clone(&sessions),
        ));
        Ok((
            Self {
                name: name.to_string(),
                database_file,
                snapshot_file,
                sessions,
                factory,
            },
            globals,
        ))
    }

    /// Returns the snapshot file.
    #[must_use]
    pub fn snapshot_file(&self) -> &Path {
        &self.snapshot_file
    }

    async fn restore(&self) -> Result<()> {
        for sidecar in naming::sidecar_files(&self.database_file) {
            remove_if_exists(&sidecar).await?;
        }
        let _ = tokio::fs::copy(&self.snapshot_file, &self.database_file)
            .await
            .map_err(|e| DatabaseError::Io {
                path: self.snapshot_file.clone(),
                source: e,
            })?;
        Ok(())
    }
}

impl fmt::Debug for SnapshotRollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotRollback")
            .field("name", &self.name)
            .field("database_file", &self.database_file)
            .field("snapshot_file", &self.snapshot_file)
            .field("open_sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseResetStrategy for SnapshotRollback {
    fn kind(&self) -> ResetStrategy {
        ResetStrategy::SnapshotRollback
    }

    fn database_file(&self) -> &Path {
        &self.database_file
    }

    fn session_factory(&self) -> Arc<SessionFactory> {
        Arc::clone(&self.factory)
    }

    async fn reset(&self) -> Result<()> {
        let terminated = self.sessions.terminate_all().await?;
        self.restore().await?;
        tracing::debug!(database = %self.name, terminated, "database restored from snapshot");
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        let terminated = self.sessions.terminate_all().await;
        let sidecars = naming::sidecar_files(&self.database_file);
        let mut files: Vec<&Path> = vec![&self.snapshot_file, &self.database_file];
        files.extend(sidecars.iter().map(PathBuf::as_path));
        remove_all(&files).await?;
        let _ = terminated?;
        tracing::info!(database = %self.name, "database dropped");
        Ok(())
    }
}
