//! Redirection of application transactions onto savepoints.
//!
//! Under the transaction savepoint strategy the whole test runs inside one
//! ambient transaction. Code under test that begins, commits or rolls back
//! its own transactions through an overriding session is redirected onto a
//! stack of savepoints, so everything it does stays reversible by the next
//! reset.
//!
//! Stack rules, with `INITIAL` as the permanent floor:
//! - begin pushes a fresh savepoint `N` (`SAVEPOINT N`).
//! - commit pops `N` and folds its work into the enclosing savepoint
//!   (`RELEASE N`).
//! - rollback pops `N` and undoes exactly its work
//!   (`ROLLBACK TO N; RELEASE N`).
//! - finishing a handle that is no longer on the stack is a no-op.

use std::fmt;

use testrig_common::constants::INITIAL_SAVEPOINT;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;

use crate::error::{DatabaseError, Result};
use crate::naming;

/// Handle to one redirected transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavepointHandle {
    name: String,
}

impl SavepointHandle {
    /// Returns the savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Savepoint stack of one ambient transaction.
pub struct TransactionOverride {
    conn: Connection,
    stack: Mutex<Vec<String>>,
}

impl TransactionOverride {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            stack: Mutex::new(vec![INITIAL_SAVEPOINT.to_string()]),
        }
    }

    /// Returns the current stack depth, counting the `INITIAL` floor.
    pub async fn depth(&self) -> usize {
        self.stack.lock().await.len()
    }

    /// Returns the savepoint names from bottom to top.
    pub async fn savepoints(&self) -> Vec<String> {
        self.stack.lock().await.clone()
    }

    /// Pushes a new savepoint.
    ///
    /// # Errors
    ///
    /// Returns the `SAVEPOINT` failure; the stack is left unchanged.
    pub async fn begin(&self) -> Result<SavepointHandle> {
        let mut stack = self.stack.lock().await;
        let name = naming::savepoint_name();
        self.execute(format!("SAVEPOINT {name}")).await?;
        stack.push(name.clone());
        tracing::trace!(savepoint = %name, depth = stack.len(), "savepoint pushed");
        Ok(SavepointHandle { name })
    }

    /// Pops `handle` and keeps its work inside the enclosing savepoint.
    ///
    /// This releases the savepoint rather than advancing the checkpoint
    /// with a fresh one, so the stack depth returns to what it was before
    /// [`begin`](Self::begin). The committed work is still undone by the
    /// next reset to `INITIAL`.
    ///
    /// # Errors
    ///
    /// Returns the `RELEASE` failure.
    pub async fn commit(&self, handle: &SavepointHandle) -> Result<()> {
        let mut stack = self.stack.lock().await;
        let Some(position) = position_above_floor(&stack, handle) else {
            tracing::debug!(savepoint = %handle.name, "commit of unknown savepoint ignored");
            return Ok(());
        };
        self.execute(format!("RELEASE {}", handle.name)).await?;
        stack.truncate(position);
        tracing::trace!(savepoint = %handle.name, depth = stack.len(), "savepoint released");
        Ok(())
    }

    /// Pops `handle` and undoes its work.
    ///
    /// # Errors
    ///
    /// Returns the `ROLLBACK TO` failure.
    pub async fn rollback(&self, handle: &SavepointHandle) -> Result<()> {
        let mut stack = self.stack.lock().await;
        let Some(position) = position_above_floor(&stack, handle) else {
            tracing::debug!(savepoint = %handle.name, "rollback of unknown savepoint ignored");
            return Ok(());
        };
        let name = &handle.name;
        self.execute(format!("ROLLBACK TO {name}; RELEASE {name};"))
            .await?;
        stack.truncate(position);
        tracing::trace!(savepoint = %name, depth = stack.len(), "savepoint rolled back");
        Ok(())
    }

    /// Drops every savepoint above the floor after the ambient transaction
    /// has been rolled back to `INITIAL` or rebuilt.
    pub(crate) async fn reset_to_floor(&self) {
        self.stack.lock().await.truncate(1);
    }

    async fn execute(&self, sql: String) -> Result<()> {
        self.conn
            .call(move |c| c.execute_batch(&sql).map_err(tokio_rusqlite::Error::from))
            .await
            .map_err(DatabaseError::from)
    }
}

/// Returns the stack index of `handle`, never the floor.
fn position_above_floor(stack: &[String], handle: &SavepointHandle) -> Option<usize> {
    stack
        .iter()
        .rposition(|name| *name == handle.name)
        .filter(|&position| position > 0)
}

impl fmt::Debug for TransactionOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOverride").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ambient() -> (Connection, TransactionOverride) {
        let conn = Connection::open_in_memory().await.expect("open");
        conn.call(|c| {
            c.execute_batch(
                "CREATE TABLE t (v INTEGER NOT NULL);
                 BEGIN;
                 SAVEPOINT INITIAL;",
            )?;
            Ok(())
        })
        .await
        .expect("ambient transaction");
        let transaction_override = TransactionOverride::new(conn.clone());
        (conn, transaction_override)
    }

    async fn insert(conn: &Connection, v: i64) {
        conn.call(move |c| {
            let _ = c.execute("INSERT INTO t (v) VALUES (?1)", [v])?;
            Ok(())
        })
        .await
        .expect("insert");
    }

    async fn values(conn: &Connection) -> Vec<i64> {
        conn.call(|c| {
            let mut stmt = c.prepare("SELECT v FROM t ORDER BY v")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
        })
        .await
        .expect("select")
    }

    #[tokio::test]
    async fn nested_begin_commit_rollback_keeps_balance() {
        let (conn, tx) = ambient().await;
        assert_eq!(tx.depth().await, 1);

        let outer = tx.begin().await.expect("begin outer");
        insert(&conn, 1).await;
        let inner = tx.begin().await.expect("begin inner");
        insert(&conn, 2).await;
        assert_eq!(tx.depth().await, 3);

        tx.rollback(&inner).await.expect("rollback inner");
        assert_eq!(tx.depth().await, 2);
        assert_eq!(values(&conn).await, vec![1]);

        tx.commit(&outer).await.expect("commit outer");
        assert_eq!(tx.depth().await, 1);
        assert_eq!(values(&conn).await, vec![1]);
    }

    #[tokio::test]
    async fn committed_work_is_still_undone_by_rolling_back_to_initial() {
        let (conn, tx) = ambient().await;
        let handle = tx.begin().await.expect("begin");
        insert(&conn, 7).await;
        tx.commit(&handle).await.expect("commit");

        conn.call(|c| {
            c.execute_batch("ROLLBACK TO INITIAL;")?;
            Ok(())
        })
        .await
        .expect("rollback to initial");
        assert!(values(&conn).await.is_empty());
    }

    #[tokio::test]
    async fn finishing_twice_never_drops_the_floor() {
        let (_conn, tx) = ambient().await;
        let handle = tx.begin().await.expect("begin");
        tx.rollback(&handle).await.expect("rollback");
        tx.rollback(&handle).await.expect("second rollback is a no-op");
        tx.commit(&handle).await.expect("commit after rollback is a no-op");
        assert_eq!(tx.savepoints().await, vec![INITIAL_SAVEPOINT.to_string()]);
    }

    #[tokio::test]
    async fn out_of_order_commit_releases_everything_above() {
        let (_conn, tx) = ambient().await;
        let outer = tx.begin().await.expect("outer");
        let _inner = tx.begin().await.expect("inner");
        tx.commit(&outer).await.expect("commit outer");
        assert_eq!(tx.depth().await, 1);
    }

    #[tokio::test]
    async fn reset_to_floor_keeps_initial_only() {
        let (_conn, tx) = ambient().await;
        let _a = tx.begin().await.expect("a");
        let _b = tx.begin().await.expect("b");
        tx.reset_to_floor().await;
        assert_eq!(tx.savepoints().await, vec![INITIAL_SAVEPOINT.to_string()]);
    }
}
