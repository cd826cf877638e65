//! # boxcheck-sdk
//!
//! Public test-facing API of the boxcheck conformance harness.
//!
//! Each per-image test is a one-liner against a shared [`Harness`]: resolve
//! the image, start one container, prove one externally observable fact,
//! and remove the container on every exit path.
//!
//! - [`Harness`](harness::Harness): engine connection, image resolution, and the one-line probes.
//! - [`TestReport`](report::TestReport): verdict, diagnostic, and teardown warning of one invocation.
//!
//! # Example
//!
//! ```rust,no_run
//! use boxcheck_common::config::HarnessConfig;
//! use boxcheck_common::context::Context;
//! use boxcheck_sdk::{Harness, HttpTestConfig};
//!
//! let harness = Harness::connect(HarnessConfig::from_env()?)?;
//! let image = harness.get_test_image("lscr.io/linuxserver/jackett:rolling");
//! harness
//!     .test_http_endpoint(&Context::background(), &image, &HttpTestConfig::new(9117).status_code(400), None)
//!     .assert_passed();
//! # Ok::<(), boxcheck_common::error::BoxcheckError>(())
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod harness;
pub mod report;

pub use boxcheck_probe::ProbeSpec;
pub use boxcheck_runtime::ContainerConfig;
pub use harness::{Harness, HttpTestConfig};
pub use report::{TestFailure, TestReport};
