//! Container lifecycle management for the boxcheck harness.
//!
//! - [`backend`]: the engine boundary and its implementations.
//! - [`spec`]: partial-override container configuration and its merge.
//! - [`lifecycle`]: start, readiness wait, and guaranteed teardown.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod exec;
pub mod lifecycle;
pub mod logs;
pub mod spec;

pub use backend::ContainerEngine;
pub use lifecycle::{ContainerGuard, ContainerHandle, LifecycleManager, LifecycleSettings};
pub use spec::{ContainerConfig, StartSpec};
