//! Schema definition, migrations and lifecycle hooks of a test database.

use async_trait::async_trait;
use testrig_common::config::SqliteConfig;
use testrig_common::error::Result;
use testrig_core::PipelineData;

use crate::global::GlobalData;
use crate::session::DbSession;

/// Describes one test database: its schema and how to seed it.
///
/// Implementors are usually unit structs. Every hook has a default that
/// does nothing.
///
/// # Example
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use testrig_sqlite::{DatabaseSchema, DbSession, GlobalData};
///
/// struct Orders;
///
/// #[async_trait]
/// impl DatabaseSchema for Orders {
///     const NAME: &'static str = "Orders";
///     const MIGRATIONS: &'static [&'static str] =
///         &["CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT NOT NULL);"];
///
///     async fn seed(&self, session: &DbSession, globals: &mut GlobalData) -> testrig_common::error::Result<()> {
///         session.execute_batch("INSERT INTO orders (item) VALUES ('seeded');").await?;
///         globals.insert("seeded_order", 1_i64);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait DatabaseSchema: Send + Sync + 'static {
    /// Schema name; keys the values published to pipeline data.
    const NAME: &'static str;

    /// Ordered migrations. The count of applied migrations is stored in
    /// `PRAGMA user_version`, so only new entries run.
    const MIGRATIONS: &'static [&'static str];

    /// Adjusts the SQLite configuration before the database is provisioned.
    ///
    /// # Errors
    ///
    /// A failure aborts initialization.
    fn on_initializing(&self, _data: &PipelineData, _config: &mut SqliteConfig) -> Result<()> {
        Ok(())
    }

    /// Inserts the seed data every test starts from.
    ///
    /// # Errors
    ///
    /// A failure aborts initialization.
    async fn seed(&self, _session: &DbSession, _globals: &mut GlobalData) -> Result<()> {
        Ok(())
    }

    /// Runs after every reset.
    ///
    /// # Errors
    ///
    /// A failure fails the reset.
    async fn on_reset(&self, _session: &DbSession) -> Result<()> {
        Ok(())
    }

    /// Whether sessions automatically carry the data recorded while seeding.
    fn auto_attach_global_data(&self) -> bool {
        true
    }
}

/// Applies the migrations not yet recorded in `PRAGMA user_version`.
///
/// Each migration runs in its own transaction together with the version
/// bump. Returns the number of migrations applied.
pub(crate) fn apply_migrations(
    conn: &mut rusqlite::Connection,
    migrations: &[&str],
) -> rusqlite::Result<usize> {
    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let current = usize::try_from(current).unwrap_or(0);

    let mut applied = 0;
    for (index, sql) in migrations.iter().enumerate().skip(current) {
        let version = i64::try_from(index + 1).unwrap_or(i64::MAX);
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        applied += 1;
    }
    Ok(applied)
}
