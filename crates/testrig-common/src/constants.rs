//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Application name used in log output and generated artifact names.
pub const APP_NAME: &str = "testrig";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "testrig";

/// Base configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "testrig.json";

/// Environment variable selecting the `testrig.{name}.json` overlay.
pub const CONFIG_ENVIRONMENT_VAR: &str = "TESTRIG_ENVIRONMENT";

/// Prefix of every generated database name.
pub const DATABASE_NAME_PREFIX: &str = "testrig";

/// Number of schema-name characters kept in a generated database name.
pub const DATABASE_NAME_SCHEMA_CHARS: usize = 8;

/// Number of random hex characters in a generated database name.
pub const DATABASE_NAME_UNIQUE_CHARS: usize = 8;

/// Suffix appended to a database name to name its seed snapshot.
pub const SNAPSHOT_SUFFIX: &str = "_init";

/// File extension of SQLite database and snapshot files.
pub const DATABASE_FILE_EXTENSION: &str = "db";

/// Savepoint marking the post-seed state of an ambient transaction.
pub const INITIAL_SAVEPOINT: &str = "INITIAL";

/// Length of generated nested-transaction savepoint names.
pub const SAVEPOINT_NAME_LENGTH: usize = 10;

/// First port handed out to hosted-service components.
pub const FIRST_SERVICE_PORT: u16 = 5000;

/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Returns the directory temporary databases are created in when the
/// configuration does not name one.
fn resolve_data_dir() -> PathBuf {
    std::env::temp_dir().join(APP_NAME)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved default data directory for this process.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the overlay configuration file name for an environment.
#[must_use]
pub fn environment_config_file_name(environment: &str) -> String {
    format!("{APP_NAME}.{environment}.json")
}
