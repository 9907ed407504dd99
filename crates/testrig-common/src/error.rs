//! Unified error types for the testrig workspace.
//!
//! Adapter crates define their own domain-specific error enums and convert
//! them into [`TestRigError::Component`], which keeps the original error
//! visible through `Display` and downcasting.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error raised by a component implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TestRigError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A pipeline data key was requested but never published.
    #[error("pipeline data key not found: {key}")]
    PipelineKeyNotFound {
        /// Requested key.
        key: String,
    },

    /// A pipeline data key holds a value of a different type.
    #[error("pipeline data key {key} does not hold a value of type {expected}")]
    PipelineTypeMismatch {
        /// Requested key.
        key: String,
        /// Type name the caller asked for.
        expected: &'static str,
    },

    /// A pipeline data key was published twice in one initialization cycle.
    #[error("pipeline data key already published: {key}")]
    PipelineKeyExists {
        /// Duplicated key.
        key: String,
    },

    /// No component of the requested type or interface is registered.
    #[error("no component registered for {component}")]
    ComponentNotRegistered {
        /// Requested type or interface name.
        component: &'static str,
    },

    /// More than one component provides the requested interface.
    #[error("{count} components provide {interface}, expected exactly one")]
    AmbiguousComponent {
        /// Requested interface name.
        interface: &'static str,
        /// Number of matching components.
        count: usize,
    },

    /// The same component type was registered twice.
    #[error("component {component} has already been registered")]
    DuplicateComponent {
        /// Concrete component type name.
        component: &'static str,
    },

    /// A component was used after it had been torn down.
    #[error("component {component} has been disposed")]
    ComponentDisposed {
        /// Concrete component type name.
        component: &'static str,
    },

    /// An environment was handed to a pool that does not own it.
    #[error("environment {id} does not belong to this pool")]
    ForeignEnvironment {
        /// Identifier of the foreign environment.
        id: u32,
    },

    /// An environment was returned without being rented.
    #[error("environment {id} is not currently rented")]
    EnvironmentNotRented {
        /// Identifier of the environment.
        id: u32,
    },

    /// The pool has been disposed and can no longer rent environments.
    #[error("environment pool has been disposed")]
    PoolDisposed,

    /// A component operation failed; the original error is preserved.
    #[error(transparent)]
    Component(BoxError),

    /// Several components failed during one fan-out operation.
    #[error("{} component operations failed; first: {}", .errors.len(), first_message(.errors))]
    Multiple {
        /// Every failure, in completion order.
        errors: Vec<TestRigError>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl TestRigError {
    /// Wraps an adapter error so it surfaces unchanged.
    pub fn component(error: impl Into<BoxError>) -> Self {
        Self::Component(error.into())
    }

    /// Collapses the failures of a fan-out operation.
    ///
    /// Returns `None` when nothing failed and the single error unchanged when
    /// exactly one component failed.
    #[must_use]
    pub fn aggregate(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple { errors }),
        }
    }

    /// Returns the adapter error if this is a [`TestRigError::Component`]
    /// wrapping an `E`.
    #[must_use]
    pub fn downcast_component<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Component(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

fn first_message(errors: &[TestRigError]) -> String {
    errors
        .first()
        .map_or_else(String::new, ToString::to_string)
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TestRigError>;
