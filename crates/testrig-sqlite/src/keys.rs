//! Pipeline data keys published by database components.
//!
//! Every key embeds the schema name, so several databases can live in one
//! environment.

/// Generated database name (`String`).
#[must_use]
pub fn database_name(schema: &str) -> String {
    format!("DatabaseName_{schema}")
}

/// Connection string (`String`); hosted services bind to it.
#[must_use]
pub fn connection_string(schema: &str) -> String {
    format!("DatabaseConnectionString_{schema}")
}

/// Session factory (`Arc<SessionFactory>`).
#[must_use]
pub fn session_factory(schema: &str) -> String {
    format!("DatabaseSessionFactory_{schema}")
}

/// Savepoint stack of the ambient transaction
/// (`Arc<TransactionOverride>`), published only under the transaction
/// savepoint strategy.
#[must_use]
pub fn transaction_override(schema: &str) -> String {
    format!("DatabaseTransactionOverride_{schema}")
}
