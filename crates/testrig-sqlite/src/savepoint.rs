//! Reset by rolling one long-lived transaction back to its first savepoint.
//!
//! The database is migrated and seeded through a throwaway connection. A
//! second connection then opens the ambient transaction the whole test runs
//! in and saves `INITIAL`. Every session shares that connection.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::ErrorCode;
use testrig_common::constants::INITIAL_SAVEPOINT;
use testrig_common::types::ResetStrategy;
use tokio_rusqlite::Connection;

use crate::error::{DatabaseError, Result};
use crate::global::GlobalData;
use crate::naming;
use crate::overrides::TransactionOverride;
use crate::schema::DatabaseSchema;
use crate::session::{SessionFactory, open_connection};
use crate::strategy::{DatabaseResetStrategy, provision, remove_all};

/// Decides whether a failed rollback to `INITIAL` means the ambient
/// transaction must be rebuilt rather than the failure reported.
///
/// The transaction is unusable when the connection fell back to autocommit
/// (the transaction is gone, for example after a raw `ROLLBACK` or a fatal
/// error) or when SQLite reports an abort, I/O, disk-full or out-of-memory
/// condition. A closed connection cannot be rebuilt.
#[must_use]
pub fn transaction_unusable(error: &DatabaseError, autocommit: bool) -> bool {
    if error.is_connection_closed() {
        return false;
    }
    autocommit
        || matches!(
            error.sqlite_code(),
            Some(
                ErrorCode::OperationAborted
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DiskFull
                    | ErrorCode::OutOfMemory
            )
        )
}

/// Transaction savepoint strategy for one provisioned database.
pub struct TransactionSavepoint {
    name: String,
    database_file: PathBuf,
    conn: Connection,
    transaction_override: Arc<TransactionOverride>,
    factory: Arc<SessionFactory>,
}

impl TransactionSavepoint {
    /// Provisions and seeds database `name` in `directory`, then opens the
    /// ambient transaction.
    ///
    /// # Errors
    ///
    /// Returns the migration, seed or `BEGIN` failure.
    pub async fn initialize<S: DatabaseSchema>(
        schema: &S,
        name: &str,
        directory: &Path,
        busy_timeout: Duration,
    ) -> testrig_common::error::Result<(Self, GlobalData)> {
        let database_file = naming::database_file(directory, name);
        let (seed_conn, globals) = provision(schema, &database_file, busy_timeout).await?;
        seed_conn.close().await.map_err(DatabaseError::from)?;

        let conn = open_connection(&database_file, busy_timeout).await?;
        conn.call(|c| {
            c.execute_batch(&begin_ambient_sql())?;
            Ok(())
        })
        .await
        .map_err(DatabaseError::from)?;
        tracing::info!(database = %name, "ambient transaction opened");

        let transaction_override = Arc::new(TransactionOverride::new(conn.clone()));
        let factory = Arc::new(SessionFactory::ambient(
            &database_file,
            conn.clone(),
            Arc::clone(&transaction_override),
        ));
        Ok((
            Self {
                name: name.to_string(),
                database_file,
                conn,
                transaction_override,
                factory,
            },
            globals,
        ))
    }

    async fn rebuild(&self) -> Result<()> {
        self.conn
            .call(|c| {
                if !c.is_autocommit() {
                    c.execute_batch("ROLLBACK")?;
                }
                c.execute_batch(&begin_ambient_sql())?;
                Ok(())
            })
            .await
            .map_err(DatabaseError::from)
    }

    async fn is_autocommit(&self) -> Result<bool> {
        self.conn
            .call(|c| Ok(c.is_autocommit()))
            .await
            .map_err(DatabaseError::from)
    }
}

impl fmt::Debug for TransactionSavepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSavepoint")
            .field("name", &self.name)
            .field("database_file", &self.database_file)
            .finish_non_exhaustive()
    }
}

fn begin_ambient_sql() -> String {
    format!("BEGIN; SAVEPOINT {INITIAL_SAVEPOINT};")
}

#[async_trait]
impl DatabaseResetStrategy for TransactionSavepoint {
    fn kind(&self) -> ResetStrategy {
        ResetStrategy::TransactionSavepoint
    }

    fn database_file(&self) -> &Path {
        &self.database_file
    }

    fn session_factory(&self) -> Arc<SessionFactory> {
        Arc::clone(&self.factory)
    }

    fn transaction_override(&self) -> Option<Arc<TransactionOverride>> {
        Some(Arc::clone(&self.transaction_override))
    }

    async fn reset(&self) -> Result<()> {
        let rolled_back = self
            .conn
            .call(|c| {
                c.execute_batch(&format!("ROLLBACK TO {INITIAL_SAVEPOINT};"))?;
                Ok(())
            })
            .await
            .map_err(DatabaseError::from);

        if let Err(error) = rolled_back {
            let Ok(autocommit) = self.is_autocommit().await else {
                return Err(error);
            };
            if !transaction_unusable(&error, autocommit) {
                return Err(error);
            }
            tracing::warn!(
                database = %self.name,
                error = %error,
                autocommit,
                "ambient transaction unusable, rebuilding"
            );
            self.rebuild().await?;
        }

        self.transaction_override.reset_to_floor().await;
        tracing::debug!(database = %self.name, "database rolled back to initial savepoint");
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        let ended = self
            .conn
            .call(|c| {
                if !c.is_autocommit() {
                    c.execute_batch("ROLLBACK")?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = ended {
            tracing::warn!(database = %self.name, error = %e, "failed to end ambient transaction");
        }
        if let Err(e) = self.conn.clone().close().await {
            tracing::warn!(database = %self.name, error = %e, "failed to close ambient connection");
        }

        let sidecars = naming::sidecar_files(&self.database_file);
        let mut files: Vec<&Path> = vec![&self.database_file];
        files.extend(sidecars.iter().map(PathBuf::as_path));
        remove_all(&files).await?;
        tracing::info!(database = %self.name, "database dropped");
        Ok(())
    }
}
