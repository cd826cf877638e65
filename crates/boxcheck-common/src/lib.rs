//! # boxcheck-common
//!
//! Shared types, the error taxonomy, harness configuration, constants, and
//! the cancellation/deadline [`Context`](context::Context) used across the
//! entire boxcheck workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod types;
