//! Domain primitive types used across the boxcheck workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine-assigned identifier of a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the short form (first 12 characters) used in log output.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine-assigned identifier of a container image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Creates a new image ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates a unique container name so leaked containers are recognisable.
#[must_use]
pub fn container_name() -> String {
    format!(
        "{}-{}",
        crate::constants::CONTAINER_NAME_PREFIX,
        uuid::Uuid::new_v4().simple()
    )
}

/// Lifecycle state of the container owned by one test invocation.
///
/// Transitions run `Created → Starting → Ready | Failed → Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// The engine created the container but it has not been started.
    Created,
    /// Start was requested; waiting for the process to come up.
    Starting,
    /// The process came up and the container may be probed.
    Ready,
    /// Start or probing failed.
    Failed,
    /// The container was removed from the engine.
    Removed,
}

impl ContainerState {
    /// Returns whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Starting | Self::Failed | Self::Removed)
                | (Self::Starting, Self::Ready | Self::Failed | Self::Removed)
                | (Self::Ready, Self::Failed | Self::Removed)
                | (Self::Failed, Self::Removed)
        )
    }

    /// Returns whether the container no longer exists in the engine.
    #[must_use]
    pub const fn is_removed(self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_long_ids() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }

    #[test]
    fn container_names_are_unique_and_prefixed() {
        let a = container_name();
        let b = container_name();
        assert!(a.starts_with("boxcheck-"));
        assert_ne!(a, b);
    }

    #[test]
    fn lifecycle_allows_forward_transitions_only() {
        assert!(ContainerState::Created.can_transition_to(ContainerState::Starting));
        assert!(ContainerState::Starting.can_transition_to(ContainerState::Ready));
        assert!(ContainerState::Ready.can_transition_to(ContainerState::Removed));
        assert!(!ContainerState::Removed.can_transition_to(ContainerState::Ready));
        assert!(!ContainerState::Ready.can_transition_to(ContainerState::Starting));
    }
}
