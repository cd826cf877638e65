//! Unified error types for the boxcheck workspace.
//!
//! The first five variants form the failure taxonomy a test invocation can
//! report. The remaining variants are raw failures that callers wrap into
//! one of those before they reach a verdict.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Classification of a failed container-engine primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// The image, repository, or container does not exist.
    NotFound,
    /// The registry refused the credentials (or lack of them).
    Unauthorized,
    /// The daemon or registry could not be reached.
    Network,
    /// The engine rejected the request (bad config, resource limits, ...).
    Rejected,
    /// The primitive did not finish within its bound.
    Timeout,
    /// The engine itself is missing or not running.
    Unavailable,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Network => write!(f, "network"),
            Self::Rejected => write!(f, "rejected"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Why an image reference could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionFailure {
    /// The reference string is not a valid image reference.
    Malformed,
    /// The repository or tag does not exist.
    NotFound,
    /// Authentication with the registry failed.
    Unauthorized,
    /// The registry could not be reached.
    Network,
    /// The image is absent locally and the pull policy forbids pulling.
    NotCached,
    /// Any other engine failure during pull.
    Engine,
}

impl From<EngineErrorKind> for ResolutionFailure {
    fn from(kind: EngineErrorKind) -> Self {
        match kind {
            EngineErrorKind::NotFound => Self::NotFound,
            EngineErrorKind::Unauthorized => Self::Unauthorized,
            EngineErrorKind::Network | EngineErrorKind::Timeout => Self::Network,
            EngineErrorKind::Rejected | EngineErrorKind::Unavailable => Self::Engine,
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed reference"),
            Self::NotFound => write!(f, "repository or tag not found"),
            Self::Unauthorized => write!(f, "authentication failed"),
            Self::Network => write!(f, "network error"),
            Self::NotCached => write!(f, "not present locally"),
            Self::Engine => write!(f, "engine error"),
        }
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BoxcheckError {
    /// The image under test could not be resolved or pulled.
    #[error("cannot resolve image {reference} ({failure}): {message}")]
    ImageResolution {
        /// Reference as given by the caller.
        reference: String,
        /// Classified cause.
        failure: ResolutionFailure,
        /// Engine or parser message.
        message: String,
    },

    /// The engine rejected creation or start, or the process never came up.
    #[error("cannot start container from {image}: {message}")]
    ContainerStart {
        /// Image the container was created from.
        image: String,
        /// Engine message.
        message: String,
    },

    /// The probe deadline elapsed without the pass condition being met.
    #[error("{probe} timed out after {elapsed:?}: {last_observed}")]
    ProbeTimeout {
        /// Probe description.
        probe: String,
        /// Time spent polling.
        elapsed: Duration,
        /// Last observed error or status.
        last_observed: String,
    },

    /// The probe received a definitive, wrong result.
    #[error("{probe}: expected {expected}, got {actual}")]
    UnexpectedResult {
        /// Probe description.
        probe: String,
        /// What would have passed.
        expected: String,
        /// What was observed.
        actual: String,
    },

    /// Removal failed after the verdict was determined.
    #[error("cannot remove container {container}: {message}")]
    Teardown {
        /// Container identifier.
        container: String,
        /// Engine message.
        message: String,
    },

    /// A container-engine primitive failed.
    #[error("engine {operation} failed ({kind}): {message}")]
    Engine {
        /// Primitive that failed (`pull`, `create`, `exec`, ...).
        operation: &'static str,
        /// Classified cause.
        kind: EngineErrorKind,
        /// Engine message, usually its stderr.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path or program where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BoxcheckError {
    /// Builds an [`BoxcheckError::Engine`] error.
    #[must_use]
    pub fn engine(operation: &'static str, kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self::Engine {
            operation,
            kind,
            message: message.into(),
        }
    }

    /// Builds a [`BoxcheckError::Config`] error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns the engine error kind, if this is an engine failure.
    #[must_use]
    pub const fn engine_kind(&self) -> Option<EngineErrorKind> {
        match self {
            Self::Engine { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns the short taxonomy name shown in summaries.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::ImageResolution { .. } => "image-resolution",
            Self::ContainerStart { .. } => "container-start",
            Self::ProbeTimeout { .. } => "probe-timeout",
            Self::UnexpectedResult { .. } => "unexpected-result",
            Self::Teardown { .. } => "teardown",
            Self::Engine { .. } => "engine",
            Self::Io { .. } => "io",
            Self::Config { .. } => "config",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BoxcheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_maps_to_resolution_failure() {
        assert_eq!(
            ResolutionFailure::from(EngineErrorKind::Unauthorized),
            ResolutionFailure::Unauthorized
        );
        assert_eq!(
            ResolutionFailure::from(EngineErrorKind::Timeout),
            ResolutionFailure::Network
        );
    }

    #[test]
    fn unexpected_result_renders_expected_and_actual() {
        let err = BoxcheckError::UnexpectedResult {
            probe: "GET :9117/".into(),
            expected: "status 400".into(),
            actual: "status 200".into(),
        };
        assert_eq!(err.to_string(), "GET :9117/: expected status 400, got status 200");
        assert_eq!(err.category(), "unexpected-result");
    }

    #[test]
    fn engine_kind_is_exposed_only_for_engine_errors() {
        let err = BoxcheckError::engine("pull", EngineErrorKind::Network, "dial tcp: timeout");
        assert_eq!(err.engine_kind(), Some(EngineErrorKind::Network));
        assert_eq!(BoxcheckError::config("bad").engine_kind(), None);
    }
}
