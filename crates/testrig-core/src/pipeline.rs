//! Per-initialization handoff store between components.
//!
//! A fresh [`PipelineData`] is created every time an environment
//! initializes. Components publish artifacts (connection strings, session
//! factories, base addresses) under string keys and later components read
//! them back with the type they expect. Keys compare case-insensitively.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use testrig_common::error::{Result, TestRigError};
use testrig_common::types::EnvironmentId;

/// Pre-defined pipeline keys.
pub mod keys {
    /// Identifier of the environment being initialized (`EnvironmentId`).
    pub const ENVIRONMENT_ID: &str = "EnvironmentId";

    /// Base address of a hosted service named `service`.
    #[must_use]
    pub fn service_base_address(service: &str) -> String {
        format!("ServiceBaseAddress_{service}")
    }
}

struct Entry {
    key: String,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// Case-insensitive, typed key/value store threaded through component
/// initialization.
#[derive(Default)]
pub struct PipelineData {
    entries: HashMap<String, Entry>,
}

impl PipelineData {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the environment identifier already published.
    #[must_use]
    pub fn for_environment(id: EnvironmentId) -> Self {
        let mut data = Self::new();
        let _ = data.entries.insert(
            normalize(keys::ENVIRONMENT_ID),
            Entry {
                key: keys::ENVIRONMENT_ID.to_string(),
                type_name: std::any::type_name::<EnvironmentId>(),
                value: Box::new(id),
            },
        );
        data
    }

    /// Publishes `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::PipelineKeyExists`] if the key was already
    /// published during this initialization cycle.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        let key = key.into();
        let normalized = normalize(&key);
        if self.entries.contains_key(&normalized) {
            return Err(TestRigError::PipelineKeyExists { key });
        }
        tracing::trace!(key = %key, type_name = std::any::type_name::<T>(), "pipeline data published");
        let _ = self.entries.insert(
            normalized,
            Entry {
                key,
                type_name: std::any::type_name::<T>(),
                value: Box::new(value),
            },
        );
        Ok(())
    }

    /// Publishes `value` under `key`, replacing any previous value.
    pub fn upsert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        let _ = self.entries.insert(
            normalize(&key),
            Entry {
                key,
                type_name: std::any::type_name::<T>(),
                value: Box::new(value),
            },
        );
    }

    /// Returns the value under `key` as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`TestRigError::PipelineKeyNotFound`] if nothing was published
    /// under `key`, or [`TestRigError::PipelineTypeMismatch`] if the value
    /// has another type.
    pub fn get<T: Any>(&self, key: &str) -> Result<&T> {
        let entry = self
            .entries
            .get(&normalize(key))
            .ok_or_else(|| TestRigError::PipelineKeyNotFound {
                key: key.to_string(),
            })?;
        entry
            .value
            .downcast_ref::<T>()
            .ok_or_else(|| TestRigError::PipelineTypeMismatch {
                key: entry.key.clone(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Returns a clone of the value under `key`.
    ///
    /// # Errors
    ///
    /// Same as [`PipelineData::get`].
    pub fn get_cloned<T: Any + Clone>(&self, key: &str) -> Result<T> {
        self.get::<T>(key).cloned()
    }

    /// Returns the identifier of the environment being initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the store was not created for an environment.
    pub fn environment_id(&self) -> Result<EnvironmentId> {
        self.get_cloned::<EnvironmentId>(keys::ENVIRONMENT_ID)
    }

    /// Returns whether a value was published under `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize(key))
    }

    /// Returns the published keys with their original casing.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.key.as_str())
    }

    /// Returns the number of published values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for PipelineData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.values().map(|e| (&e.key, e.type_name)))
            .finish()
    }
}

fn normalize(key: &str) -> String {
    key.to_lowercase()
}
