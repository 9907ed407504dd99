//! Error types for the SQLite database component.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use testrig_common::error::TestRigError;
use thiserror::Error;

/// Failure raised by SQLite sessions and reset strategies.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A statement failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The background connection failed or was closed.
    #[error("sqlite connection error: {0}")]
    Connection(tokio_rusqlite::Error),

    /// A database, snapshot or sidecar file could not be handled.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The component was used before `initialize`.
    #[error("database for schema {schema} is not initialized")]
    NotInitialized {
        /// Schema name.
        schema: &'static str,
    },

    /// A real transaction was requested on a connection that already holds
    /// the ambient test transaction.
    #[error("session already runs inside the ambient test transaction; enable transaction overriding")]
    AlreadyInTransaction,

    /// The database has been dropped.
    #[error("database {name} has been disposed")]
    Disposed {
        /// Generated database name.
        name: String,
    },
}

impl DatabaseError {
    /// Returns the primary SQLite result code, if the failure came from the
    /// engine.
    #[must_use]
    pub fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Sqlite(e) => e.sqlite_error_code(),
            Self::Connection(tokio_rusqlite::Error::Rusqlite(e)) => e.sqlite_error_code(),
            _ => None,
        }
    }

    /// Returns whether the background connection is gone.
    #[must_use]
    pub const fn is_connection_closed(&self) -> bool {
        matches!(self, Self::Connection(tokio_rusqlite::Error::ConnectionClosed))
    }
}

impl From<tokio_rusqlite::Error> for DatabaseError {
    fn from(error: tokio_rusqlite::Error) -> Self {
        match error {
            tokio_rusqlite::Error::Rusqlite(inner) => Self::Sqlite(inner),
            other => Self::Connection(other),
        }
    }
}

impl From<DatabaseError> for TestRigError {
    fn from(error: DatabaseError) -> Self {
        Self::component(error)
    }
}

/// Result alias for SQLite component operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_statement_errors_from_the_connection_thread() {
        let err = DatabaseError::from(tokio_rusqlite::Error::Rusqlite(
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ABORT), None),
        ));
        assert!(matches!(err, DatabaseError::Sqlite(_)));
        assert_eq!(err.sqlite_code(), Some(ErrorCode::OperationAborted));
    }

    #[test]
    fn closed_connection_is_recognized() {
        let err = DatabaseError::from(tokio_rusqlite::Error::ConnectionClosed);
        assert!(err.is_connection_closed());
        assert_eq!(err.sqlite_code(), None);
    }

    #[test]
    fn converts_into_component_error_preserving_source() {
        let err: TestRigError = DatabaseError::AlreadyInTransaction.into();
        assert!(err.downcast_component::<DatabaseError>().is_some());
    }
}
