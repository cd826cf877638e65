//! Container configuration overrides and their merge into a start spec.
//!
//! A [`ContainerConfig`] is a partial override: every field that is unset
//! keeps the default, every field that is set replaces exactly that field.
//! Environment variables merge key by key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Optional per-test overrides of how the container is launched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerConfig {
    /// Environment variables to set; unlisted variables keep image defaults.
    pub env: BTreeMap<String, String>,
    /// Replacement command (arguments to the entrypoint).
    pub command: Option<Vec<String>>,
    /// Replacement entrypoint.
    pub entrypoint: Option<Vec<String>>,
    /// Network mode (`bridge`, `host`, `none`, or a network name).
    pub network: Option<String>,
}

impl ContainerConfig {
    /// An empty override.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Replaces the command.
    #[must_use]
    pub fn command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the entrypoint.
    #[must_use]
    pub fn entrypoint<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the network mode.
    #[must_use]
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Returns whether the caller chose what process the container runs.
    #[must_use]
    pub const fn overrides_process(&self) -> bool {
        self.command.is_some() || self.entrypoint.is_some()
    }
}

/// Concrete launch parameters after merging overrides into defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSpec {
    /// Environment set on the container.
    pub env: BTreeMap<String, String>,
    /// Command, `None` for the image default.
    pub command: Option<Vec<String>>,
    /// Entrypoint, `None` for the image default.
    pub entrypoint: Option<Vec<String>>,
    /// Network mode, `None` for the engine default.
    pub network: Option<String>,
}

impl StartSpec {
    /// Returns whether the spec replaces the image's process.
    #[must_use]
    pub const fn overrides_process(&self) -> bool {
        self.command.is_some() || self.entrypoint.is_some()
    }
}

/// Overlays `overrides` onto `defaults`.
///
/// Without overrides the defaults are returned unchanged. Each set field
/// replaces its default; each environment key replaces only that key.
#[must_use]
pub fn merge(defaults: &StartSpec, overrides: Option<&ContainerConfig>) -> StartSpec {
    let mut spec = defaults.clone();
    let Some(overrides) = overrides else {
        return spec;
    };

    spec.env
        .extend(overrides.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(command) = &overrides.command {
        spec.command = Some(command.clone());
    }
    if let Some(entrypoint) = &overrides.entrypoint {
        spec.entrypoint = Some(entrypoint.clone());
    }
    if let Some(network) = &overrides.network {
        spec.network = Some(network.clone());
    }
    spec
}
