//! Sessions against a test database.
//!
//! A [`SessionFactory`] is published to pipeline data so later components
//! and test bodies can open [`DbSession`]s. How a session reaches the
//! database depends on the reset strategy:
//! - snapshot rollback: every session opens its own tracked connection,
//!   which the next reset terminates.
//! - transaction savepoint: every session shares the one connection that
//!   holds the ambient test transaction.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use rusqlite::types::{FromSql, Value};
use tokio_rusqlite::Connection;

use crate::error::{DatabaseError, Result};
use crate::global::GlobalData;
use crate::overrides::{SavepointHandle, TransactionOverride};

/// Callback run on every session right after it is created.
pub type SessionCallback = Arc<dyn Fn(&mut DbSession) + Send + Sync>;

/// Opens a tokio-rusqlite connection with the configured busy timeout.
pub(crate) async fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path).await?;
    conn.call(move |c| {
        c.busy_timeout(busy_timeout)?;
        Ok(())
    })
    .await?;
    Ok(conn)
}

/// Connections handed out by a factory, kept so they can be terminated.
#[derive(Default)]
pub struct SessionRegistry {
    open: Mutex<Vec<Connection>>,
}

impl SessionRegistry {
    fn track(&self, conn: Connection) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }

    /// Returns the number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns whether no connection is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every tracked connection and returns how many were closed.
    ///
    /// Every connection is attempted; the first close failure is returned
    /// afterwards. Sessions holding a terminated connection fail with a
    /// closed connection error on their next call.
    ///
    /// # Errors
    ///
    /// Returns the first connection that could not be closed.
    pub async fn terminate_all(&self) -> Result<usize> {
        let connections: Vec<Connection> = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut outcomes = Vec::with_capacity(connections.len());
        for conn in connections {
            outcomes.push(conn.close().await);
        }
        tally_closed(outcomes)
    }
}

/// Counts closed connections, treating already-closed ones as done.
fn tally_closed<I>(outcomes: I) -> Result<usize>
where
    I: IntoIterator<Item = std::result::Result<(), tokio_rusqlite::Error>>,
{
    let mut terminated = 0;
    let mut first_failure = None;
    for outcome in outcomes {
        match outcome {
            Ok(()) => terminated += 1,
            Err(tokio_rusqlite::Error::ConnectionClosed) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to close session connection");
                if first_failure.is_none() {
                    first_failure = Some(DatabaseError::from(e));
                }
            }
        }
    }
    first_failure.map_or(Ok(terminated), Err)
}

enum Target {
    Dedicated {
        path: PathBuf,
        busy_timeout: Duration,
        sessions: Arc<SessionRegistry>,
    },
    Ambient {
        conn: Connection,
        transaction_override: Arc<TransactionOverride>,
    },
}

/// Creates sessions against one test database.
pub struct SessionFactory {
    connection_string: String,
    target: Target,
    on_created: RwLock<Vec<SessionCallback>>,
}

impl SessionFactory {
    pub(crate) fn dedicated(path: &Path, busy_timeout: Duration, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            connection_string: path.display().to_string(),
            target: Target::Dedicated {
                path: path.to_path_buf(),
                busy_timeout,
                sessions,
            },
            on_created: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn ambient(
        path: &Path,
        conn: Connection,
        transaction_override: Arc<TransactionOverride>,
    ) -> Self {
        Self {
            connection_string: path.display().to_string(),
            target: Target::Ambient {
                conn,
                transaction_override,
            },
            on_created: RwLock::new(Vec::new()),
        }
    }

    /// Returns the connection string (the database file path).
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Registers a callback run on every session created afterwards.
    ///
    /// Callbacks run synchronously, in registration order, right after the
    /// session is constructed.
    pub fn on_created(&self, callback: impl Fn(&mut DbSession) + Send + Sync + 'static) {
        self.on_created
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Returns the number of registered creation callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.on_created
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Creates a session whose `begin_transaction` opens a real
    /// transaction, or fails under the ambient test transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be opened.
    pub async fn create(&self) -> Result<DbSession> {
        self.build(false).await
    }

    /// Creates a session whose transactions are redirected onto savepoints
    /// of the ambient test transaction.
    ///
    /// Without an ambient transaction this is the same as
    /// [`SessionFactory::create`].
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be opened.
    pub async fn create_overriding(&self) -> Result<DbSession> {
        self.build(true).await
    }

    async fn build(&self, overriding: bool) -> Result<DbSession> {
        let mut session = match &self.target {
            Target::Dedicated {
                path,
                busy_timeout,
                sessions,
            } => {
                let conn = open_connection(path, *busy_timeout).await?;
                sessions.track(conn.clone());
                DbSession::new(conn, Mode::Dedicated)
            }
            Target::Ambient {
                conn,
                transaction_override,
            } => {
                let mode = if overriding {
                    Mode::Overriding(Arc::clone(transaction_override))
                } else {
                    Mode::Ambient
                };
                DbSession::new(conn.clone(), mode)
            }
        };

        let callbacks = self
            .on_created
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in &callbacks {
            callback(&mut session);
        }
        Ok(session)
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            Target::Dedicated { .. } => "dedicated",
            Target::Ambient { .. } => "ambient",
        };
        f.debug_struct("SessionFactory")
            .field("connection_string", &self.connection_string)
            .field("target", &target)
            .field("callbacks", &self.callback_count())
            .finish_non_exhaustive()
    }
}

enum Mode {
    Dedicated,
    Ambient,
    Overriding(Arc<TransactionOverride>),
}

/// A unit of work against the test database.
pub struct DbSession {
    conn: Connection,
    mode: Mode,
    globals: Option<Arc<GlobalData>>,
}

impl DbSession {
    const fn new(conn: Connection, mode: Mode) -> Self {
        Self {
            conn,
            mode,
            globals: None,
        }
    }

    pub(crate) const fn seeding(conn: Connection) -> Self {
        Self::new(conn, Mode::Dedicated)
    }

    /// Attaches seed-time global data to this session.
    pub fn attach_globals(&mut self, globals: Arc<GlobalData>) {
        self.globals = Some(globals);
    }

    /// Returns the attached seed-time global data.
    #[must_use]
    pub const fn globals(&self) -> Option<&Arc<GlobalData>> {
        self.globals.as_ref()
    }

    /// Returns whether transactions on this session are redirected onto
    /// savepoints.
    #[must_use]
    pub const fn is_overriding(&self) -> bool {
        matches!(self.mode, Mode::Overriding(_))
    }

    /// Runs `f` on the connection thread.
    ///
    /// # Errors
    ///
    /// Returns the statement failure or a closed-connection error.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn
            .call(move |c| f(c).map_err(tokio_rusqlite::Error::from))
            .await
            .map_err(DatabaseError::from)
    }

    /// Executes one or more statements without parameters.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement's error.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.call(move |c| c.execute_batch(&sql)).await
    }

    /// Executes one statement and returns the number of changed rows.
    ///
    /// # Errors
    ///
    /// Returns the statement failure.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<usize> {
        let sql = sql.to_string();
        self.call(move |c| c.execute(&sql, rusqlite::params_from_iter(params)))
            .await
    }

    /// Runs a query returning one row and reads its first column.
    ///
    /// # Errors
    ///
    /// Returns the query failure, including when no row matches.
    pub async fn query_scalar<T>(&self, sql: &str, params: Vec<Value>) -> Result<T>
    where
        T: FromSql + Send + 'static,
    {
        let sql = sql.to_string();
        self.call(move |c| c.query_row(&sql, rusqlite::params_from_iter(params), |row| row.get(0)))
            .await
    }

    /// Begins a transaction.
    ///
    /// On an overriding session the ambient test transaction is reused and
    /// a savepoint is pushed instead.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::AlreadyInTransaction`] on a plain session
    /// that shares the ambient test transaction, or the `BEGIN` failure.
    pub async fn begin_transaction(&self) -> Result<DbTransaction> {
        let kind = match &self.mode {
            Mode::Dedicated => {
                self.execute_batch("BEGIN").await?;
                TransactionKind::Real(self.conn.clone())
            }
            Mode::Ambient => return Err(DatabaseError::AlreadyInTransaction),
            Mode::Overriding(transaction_override) => {
                let handle = transaction_override.begin().await?;
                TransactionKind::Overridden {
                    handle,
                    transaction_override: Arc::clone(transaction_override),
                }
            }
        };
        Ok(DbTransaction {
            kind,
            finished: false,
        })
    }

    /// Closes the session.
    ///
    /// A dedicated connection is closed; a shared ambient connection stays
    /// open.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the dedicated connection fails.
    pub async fn close(self) -> Result<()> {
        match self.mode {
            Mode::Dedicated => match self.conn.close().await {
                Ok(()) | Err(tokio_rusqlite::Error::ConnectionClosed) => Ok(()),
                Err(e) => Err(e.into()),
            },
            Mode::Ambient | Mode::Overriding(_) => Ok(()),
        }
    }
}

impl fmt::Debug for DbSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Dedicated => "dedicated",
            Mode::Ambient => "ambient",
            Mode::Overriding(_) => "overriding",
        };
        f.debug_struct("DbSession")
            .field("mode", &mode)
            .field("globals", &self.globals)
            .finish_non_exhaustive()
    }
}

enum TransactionKind {
    Real(Connection),
    Overridden {
        handle: SavepointHandle,
        transaction_override: Arc<TransactionOverride>,
    },
}

/// A transaction opened through [`DbSession::begin_transaction`].
///
/// Must be finished with [`DbTransaction::commit`] or
/// [`DbTransaction::rollback`]; dropping it unfinished leaves the work in
/// place and logs a warning.
pub struct DbTransaction {
    kind: TransactionKind,
    finished: bool,
}

impl DbTransaction {
    /// Returns whether this transaction is a savepoint inside the ambient
    /// test transaction.
    #[must_use]
    pub const fn is_overridden(&self) -> bool {
        matches!(self.kind, TransactionKind::Overridden { .. })
    }

    /// Commits the transaction.
    ///
    /// An overridden transaction only folds its work into the enclosing
    /// savepoint; nothing becomes durable.
    ///
    /// # Errors
    ///
    /// Returns the `COMMIT` or `RELEASE` failure.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        match &self.kind {
            TransactionKind::Real(conn) => run(conn, "COMMIT").await,
            TransactionKind::Overridden {
                handle,
                transaction_override,
            } => transaction_override.commit(handle).await,
        }
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns the `ROLLBACK` failure.
    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        match &self.kind {
            TransactionKind::Real(conn) => run(conn, "ROLLBACK").await,
            TransactionKind::Overridden {
                handle,
                transaction_override,
            } => transaction_override.rollback(handle).await,
        }
    }
}

impl fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("DbTransaction");
        if let TransactionKind::Overridden { handle, .. } = &self.kind {
            let _ = debug.field("savepoint", &handle.name());
        }
        debug.field("finished", &self.finished).finish_non_exhaustive()
    }
}

impl Drop for DbTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                overridden = self.is_overridden(),
                "transaction dropped without commit or rollback"
            );
        }
    }
}

async fn run(conn: &Connection, sql: &'static str) -> Result<()> {
    conn.call(move |c| c.execute_batch(sql).map_err(tokio_rusqlite::Error::from))
        .await
        .map_err(DatabaseError::from)
}
