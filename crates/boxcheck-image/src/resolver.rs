//! Image resolution with pull policy and a per-run cache.
//!
//! Resolution happens once per test invocation, before any container is
//! created. Failures are reported as `BoxcheckError::ImageResolution` and
//! are never retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use boxcheck_common::config::{HarnessConfig, PullPolicy};
use boxcheck_common::error::{BoxcheckError, ResolutionFailure, Result};
use boxcheck_common::types::ImageId;

use crate::reference::ImageReference;
use crate::store::ImageStore;

/// An image that is present in the engine and ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Canonical reference the image was resolved from.
    pub reference: ImageReference,
    /// Engine image ID.
    pub id: ImageId,
    /// Whether this resolution pulled from the registry.
    pub pulled: bool,
}

impl ResolvedImage {
    /// Reference string handed to the engine when creating containers.
    #[must_use]
    pub fn run_reference(&self) -> String {
        self.reference.to_string()
    }
}

/// Resolves references against an [`ImageStore`].
pub struct ImageResolver {
    store: Arc<dyn ImageStore>,
    policy: PullPolicy,
    default_registry: Option<String>,
    image_override: Option<String>,
    cache: Mutex<HashMap<String, Slot>>,
}

/// One cache entry. Held while its reference is being fetched, so
/// concurrent resolutions of the same image wait for a single pull.
type Slot = Arc<Mutex<Option<ResolvedImage>>>;

impl std::fmt::Debug for ImageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageResolver")
            .field("policy", &self.policy)
            .field("default_registry", &self.default_registry)
            .field("image_override", &self.image_override)
            .finish_non_exhaustive()
    }
}

impl ImageResolver {
    /// Creates a resolver using the pull settings from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn ImageStore>, config: &HarnessConfig) -> Self {
        Self {
            store,
            policy: config.pull_policy,
            default_registry: config.default_registry.clone(),
            image_override: config.image_override.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the pull policy in effect.
    #[must_use]
    pub const fn policy(&self) -> PullPolicy {
        self.policy
    }

    /// Resolves `reference`, pulling according to the pull policy.
    ///
    /// When an image override is configured (`TEST_IMAGE`), it replaces
    /// `reference` entirely. Repeated resolution of the same canonical
    /// reference returns the cached result without touching the engine.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::ImageResolution` if the reference is
    /// malformed, absent under `never`, or the pull fails.
    pub fn resolve(&self, reference: &str) -> Result<ResolvedImage> {
        let requested = match &self.image_override {
            Some(image) => {
                tracing::info!(requested = reference, image = %image, "image override in effect");
                image.as_str()
            }
            None => reference,
        };

        let mut parsed = ImageReference::parse(requested)?;
        if let Some(registry) = &self.default_registry {
            parsed = parsed.with_default_registry(registry);
        }
        let key = parsed.to_string();

        let slot = Arc::clone(
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.clone())
                .or_default(),
        );
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = entry.as_ref() {
            tracing::debug!(image = %key, "image resolved from run cache");
            return Ok(hit.clone());
        }

        let resolved = self.fetch(parsed, &key)?;
        *entry = Some(resolved.clone());
        Ok(resolved)
    }

    fn fetch(&self, reference: ImageReference, key: &str) -> Result<ResolvedImage> {
        let must_pull = match self.policy {
            PullPolicy::Always => true,
            PullPolicy::IfNotPresent | PullPolicy::Never => {
                match self.store.inspect_image(key).map_err(|e| wrap(key, e))? {
                    Some(id) => {
                        tracing::info!(image = %key, id = %id, "image present locally");
                        return Ok(ResolvedImage {
                            reference,
                            id,
                            pulled: false,
                        });
                    }
                    None => true,
                }
            }
        };

        if must_pull && self.policy == PullPolicy::Never {
            return Err(BoxcheckError::ImageResolution {
                reference: key.to_string(),
                failure: ResolutionFailure::NotCached,
                message: "pull policy is 'never'".into(),
            });
        }

        tracing::info!(image = %key, policy = %self.policy, "pulling image");
        self.store.pull(key).map_err(|e| wrap(key, e))?;

        let id = self
            .store
            .inspect_image(key)
            .map_err(|e| wrap(key, e))?
            .ok_or_else(|| BoxcheckError::ImageResolution {
                reference: key.to_string(),
                failure: ResolutionFailure::Engine,
                message: "image missing after a successful pull".into(),
            })?;
        tracing::info!(image = %key, id = %id, "image pulled");

        Ok(ResolvedImage {
            reference,
            id,
            pulled: true,
        })
    }
}

fn wrap(reference: &str, err: BoxcheckError) -> BoxcheckError {
    match err {
        BoxcheckError::Engine { kind, message, .. } => BoxcheckError::ImageResolution {
            reference: reference.to_string(),
            failure: kind.into(),
            message,
        },
        err @ BoxcheckError::ImageResolution { .. } => err,
        other => BoxcheckError::ImageResolution {
            reference: reference.to_string(),
            failure: ResolutionFailure::Engine,
            message: other.to_string(),
        },
    }
}
