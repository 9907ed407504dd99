//! # testrig-core
//!
//! The lifecycle core of testrig.
//!
//! Provides:
//! - **Component**: the pluggable initialize/reset/dispose contract.
//! - **Lifetime**: singleton and transient wrappers enforcing lifetime rules.
//! - **Pipeline**: the per-initialization handoff store between components.
//! - **Registry**: start-up registration of components and their capabilities.
//! - **Environment**: an ordered, rentable set of initialized components.
//! - **Pool**: singleton and parallel distribution of environments.
//! - **Network**: free port allocation for hosted-service components.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod component;
pub mod environment;
pub mod lifetime;
pub mod network;
pub mod pipeline;
pub mod pool;
pub mod registry;

pub use component::Component;
pub use environment::Environment;
pub use pipeline::PipelineData;
pub use pool::EnvironmentPool;
pub use registry::ComponentRegistry;
