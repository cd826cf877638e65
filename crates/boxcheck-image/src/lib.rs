//! # boxcheck-image
//!
//! Image handling for the boxcheck harness.
//!
//! - **Reference**: parsing and canonicalising `registry/repo:tag@digest`.
//! - **Store**: the engine seam the resolver pulls and inspects through.
//! - **Resolver**: pull policy, `TEST_IMAGE` substitution, per-run cache.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod reference;
pub mod resolver;
pub mod store;

pub use reference::ImageReference;
pub use resolver::{ImageResolver, ResolvedImage};
pub use store::ImageStore;
