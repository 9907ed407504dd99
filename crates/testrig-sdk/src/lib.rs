//! # testrig-sdk
//!
//! Public harness for running tests against pooled environments.
//!
//! Provides:
//! - [`TestRigBuilder`]: configuration and component registration.
//! - [`ExecutionPlan`](plan::ExecutionPlan): singleton or parallel pool, and why.
//! - [`TestRig`]: renting, running against and shutting down environments.
//! - [`logging`]: tracing subscriber setup for binaries and test suites.
//!
//! # Example
//!
//! ```rust,no_run
//! use testrig_sdk::TestRig;
//!
//! # async fn example() -> testrig_common::error::Result<()> {
//! let rig = TestRig::builder().units_of_work(4).start().await?;
//! let lease = rig.rent().await?;
//! println!("renting environment {}", lease.id());
//! lease.finish().await?;
//! rig.shutdown().await
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod harness;
pub mod lease;
pub mod logging;
pub mod plan;

pub use harness::{TestRig, TestRigBuilder};
pub use lease::Lease;
pub use plan::{ExecutionPlan, SequentialReason};
