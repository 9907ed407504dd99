//! Generated names for databases, snapshots and savepoints.

use std::path::{Path, PathBuf};

use testrig_common::constants::{
    DATABASE_FILE_EXTENSION, DATABASE_NAME_PREFIX, DATABASE_NAME_SCHEMA_CHARS,
    DATABASE_NAME_UNIQUE_CHARS, SAVEPOINT_NAME_LENGTH, SNAPSHOT_SUFFIX,
};
use uuid::Uuid;

/// Sidecar files SQLite may leave next to a database file.
pub const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// Generates a unique database name for `schema`.
///
/// The name is `testrig_{schema}_{unique}`, where `{schema}` is the first
/// alphanumeric characters of the schema name, lowercased, and `{unique}` is
/// random hex.
#[must_use]
pub fn database_name(schema: &str) -> String {
    let schema: String = schema
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(DATABASE_NAME_SCHEMA_CHARS)
        .collect();
    let unique = Uuid::new_v4().simple().to_string();
    format!(
        "{DATABASE_NAME_PREFIX}_{schema}_{}",
        &unique[..DATABASE_NAME_UNIQUE_CHARS]
    )
}

/// Returns the snapshot name derived from a database name.
#[must_use]
pub fn snapshot_name(database: &str) -> String {
    format!("{database}{SNAPSHOT_SUFFIX}")
}

/// Returns the file holding database `name` inside `directory`.
#[must_use]
pub fn database_file(directory: &Path, name: &str) -> PathBuf {
    directory.join(format!("{name}.{DATABASE_FILE_EXTENSION}"))
}

/// Returns the sidecar files of `database_file`.
#[must_use]
pub fn sidecar_files(database_file: &Path) -> Vec<PathBuf> {
    SIDECAR_SUFFIXES
        .iter()
        .map(|suffix| {
            let mut name = database_file.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}

/// Returns whether `file_name` looks like a database, snapshot or sidecar
/// file generated by testrig.
#[must_use]
pub fn is_generated_file(file_name: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(DATABASE_NAME_PREFIX) else {
        return false;
    };
    if !rest.starts_with('_') {
        return false;
    }
    let extension = format!(".{DATABASE_FILE_EXTENSION}");
    file_name.ends_with(&extension)
        || SIDECAR_SUFFIXES
            .iter()
            .any(|suffix| file_name.ends_with(&format!("{extension}{suffix}")))
}

/// Generates a short savepoint name made of letters only.
///
/// Every hex digit of a random identifier is shifted 17 code points, which
/// maps `0-9` to `A-J` and `a-f` to `r-w`, then the result is truncated.
#[must_use]
pub fn savepoint_name() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .bytes()
        .take(SAVEPOINT_NAME_LENGTH)
        .map(|b| char::from(b + 17))
        .collect()
}
