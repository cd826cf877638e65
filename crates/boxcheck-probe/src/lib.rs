//! Readiness and probe suite for the boxcheck harness.
//!
//! A [`ProbeSpec`] names one externally observable fact about a running
//! container. [`ProbeSpec::resolve`] polls the container until the fact
//! holds, a definitive contrary answer arrives, or the deadline passes, and
//! returns a [`ProbeResult`]. On failure, [`diagnostic::report`] gathers the
//! container's exit state and recent logs.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod command;
pub mod diagnostic;
pub mod file;
pub mod http;
pub mod probe;
pub mod result;

pub use diagnostic::Diagnostic;
pub use probe::{HttpProbe, ProbeSettings, ProbeSpec};
pub use result::{FailureCause, ProbeResult, Verdict};
