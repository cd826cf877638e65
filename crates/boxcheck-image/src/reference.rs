//! Image reference parsing.
//!
//! Accepts the usual `[registry/]repository[:tag][@digest]` forms. The
//! first path component is treated as a registry when it contains a `.` or
//! a `:`, or is `localhost`.

use std::fmt;
use std::str::FromStr;

use boxcheck_common::constants::DEFAULT_TAG;
use boxcheck_common::error::{BoxcheckError, ResolutionFailure, Result};
use serde::{Deserialize, Serialize};

const MAX_TAG_LEN: usize = 128;

/// A parsed, pullable image identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parses an image reference string.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::ImageResolution` with
    /// [`ResolutionFailure::Malformed`] if the string is not a valid reference.
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(malformed(input, "reference is empty"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(malformed(input, "reference contains whitespace"));
        }

        let (name, digest) = match raw.split_once('@') {
            Some((name, digest)) => {
                validate_digest(input, digest)?;
                (name, Some(digest.to_string()))
            }
            None => (raw, None),
        };

        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name[split + 1..];
                validate_tag(input, tag)?;
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest)) if is_registry(first) => (Some(first.to_string()), rest),
            _ => (None, path),
        };
        validate_repository(input, repository)?;

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Returns a copy with `registry` applied when none was named.
    #[must_use]
    pub fn with_default_registry(mut self, registry: &str) -> Self {
        if self.registry.is_none() && !registry.is_empty() {
            // A default like `quay.io/home-operations` carries a namespace too.
            match registry.split_once('/') {
                Some((host, namespace)) if !self.repository.contains('/') => {
                    self.registry = Some(host.to_string());
                    self.repository = format!("{namespace}/{}", self.repository);
                }
                Some((host, _)) => self.registry = Some(host.to_string()),
                None => self.registry = Some(registry.to_string()),
            }
        }
        self
    }

    /// Registry host, if the reference names one.
    #[must_use]
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Repository path without registry or tag.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, defaulting to `latest` when neither tag nor digest is given.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match (&self.tag, &self.digest) {
            (Some(tag), _) => Some(tag),
            (None, None) => Some(DEFAULT_TAG),
            (None, Some(_)) => None,
        }
    }

    /// Content digest, if pinned.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Last path component of the repository (`plex` for `home-operations/plex`).
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = self.tag() {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = BoxcheckError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_repository(input: &str, repository: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(malformed(input, "repository is empty"));
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err(malformed(input, "repository has an empty path component"));
        }
        let valid = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(malformed(
                input,
                &format!("invalid repository component {component:?}"),
            ));
        }
    }
    Ok(())
}

fn validate_tag(input: &str, tag: &str) -> Result<()> {
    if tag.is_empty() || tag.len() > MAX_TAG_LEN {
        return Err(malformed(input, "tag must be 1-128 characters"));
    }
    if tag.starts_with(['.', '-']) {
        return Err(malformed(input, "tag must not start with '.' or '-'"));
    }
    if !tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(malformed(input, &format!("invalid tag {tag:?}")));
    }
    Ok(())
}

fn validate_digest(input: &str, digest: &str) -> Result<()> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(malformed(input, "digest must be algorithm:hex"));
    };
    if algorithm.is_empty() || hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(malformed(input, &format!("invalid digest {digest:?}")));
    }
    Ok(())
}

fn malformed(input: &str, message: &str) -> BoxcheckError {
    BoxcheckError::ImageResolution {
        reference: input.to_string(),
        failure: ResolutionFailure::Malformed,
        message: message.to_string(),
    }
}
