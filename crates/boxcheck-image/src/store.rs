//! Engine seam used by the resolver.
//!
//! The runtime crate's engines implement this trait; the resolver never
//! talks to an engine any other way.

use boxcheck_common::error::Result;
use boxcheck_common::types::ImageId;

/// Image primitives of a container engine.
pub trait ImageStore: Send + Sync {
    /// Returns the engine's image ID if the reference is present locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn inspect_image(&self, reference: &str) -> Result<Option<ImageId>>;

    /// Pulls the reference from its registry.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::Engine` classified as `NotFound`,
    /// `Unauthorized`, or `Network` when the pull fails.
    fn pull(&self, reference: &str) -> Result<()>;
}
