//! Configuration model for testrig.
//!
//! Configuration is read from an optional `testrig.json` in a directory,
//! overlaid by an optional `testrig.{TESTRIG_ENVIRONMENT}.json`. Missing
//! files fall back to [`TestRigConfig::default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants;
use crate::error::{Result, TestRigError};
use crate::types::ResetStrategy;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestRigConfig {
    /// Environment pool settings.
    pub pool: PoolConfig,
    /// SQLite database component settings.
    pub sqlite: SqliteConfig,
}

/// Environment pool settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on concurrently rented environments.
    pub max_parallelism: Option<usize>,
    /// Forces the singleton pool regardless of the amount of work.
    pub disable_parallelization: bool,
}

/// SQLite database component settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Directory temporary databases and snapshots are created in.
    pub directory: Option<PathBuf>,
    /// How databases return to their seeded state between rents.
    pub reset_strategy: ResetStrategy,
    /// Busy timeout applied to every connection, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            directory: None,
            reset_strategy: ResetStrategy::default(),
            busy_timeout_ms: constants::DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl SqliteConfig {
    /// Returns the configured directory or the process default.
    #[must_use]
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| constants::data_dir().clone())
    }
}

impl TestRigConfig {
    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a value is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `dir`, honoring the environment overlay
    /// named by `TESTRIG_ENVIRONMENT`.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be read or parsed, or if
    /// the merged configuration is invalid.
    pub fn load(dir: &Path) -> Result<Self> {
        let environment = std::env::var(constants::CONFIG_ENVIRONMENT_VAR).ok();
        Self::load_for(dir, environment.as_deref())
    }

    /// Loads configuration from `dir` with an explicit overlay name.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file cannot be read or parsed, or if
    /// the merged configuration is invalid.
    pub fn load_for(dir: &Path, environment: Option<&str>) -> Result<Self> {
        let mut merged = Value::Object(serde_json::Map::new());

        if let Some(base) = read_optional_json(&dir.join(constants::CONFIG_FILE_NAME))? {
            merge_json(&mut merged, base);
        }
        if let Some(name) = environment.filter(|n| !n.is_empty()) {
            let overlay_path = dir.join(constants::environment_config_file_name(name));
            if let Some(overlay) = read_optional_json(&overlay_path)? {
                merge_json(&mut merged, overlay);
            }
        }

        let config: Self = serde_json::from_value(merged).map_err(|e| TestRigError::Config {
            message: format!("{}: {e}", dir.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::Config`] naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_parallelism == Some(0) {
            return Err(TestRigError::Config {
                message: "pool:max_parallelism must be at least 1".into(),
            });
        }
        if self.sqlite.busy_timeout_ms == 0 {
            return Err(TestRigError::Config {
                message: "sqlite:busy_timeout_ms must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

fn read_optional_json(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| TestRigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value = serde_json::from_str(&content).map_err(|e| TestRigError::Config {
        message: format!("{}: {e}", path.display()),
    })?;
    Ok(Some(value))
}

/// Deep-merges `overlay` into `base`; objects merge key by key, every other
/// value replaces the base value.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
