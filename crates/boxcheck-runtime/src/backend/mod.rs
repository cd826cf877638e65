//! Container engine boundary.
//!
//! The harness drives an engine it does not implement. Everything it needs
//! from one is expressed by [`ContainerEngine`], whose errors are classified
//! by [`EngineErrorKind`](boxcheck_common::error::EngineErrorKind) so callers
//! can wrap them into the failure taxonomy.

pub mod cli;
pub mod process;
pub mod scripted;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::error::Result;
use boxcheck_common::types::ContainerId;
use boxcheck_image::ImageStore;
use chrono::{DateTime, Utc};

use crate::exec::ExecOutput;
use crate::logs::ContainerLogs;

/// Everything the engine needs to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    /// Unique container name.
    pub name: String,
    /// Image reference to run.
    pub image: String,
    /// Labels attached to the container.
    pub labels: BTreeMap<String, String>,
    /// Environment variables set on top of the image's own.
    pub env: BTreeMap<String, String>,
    /// Replacement command (arguments), if any.
    pub command: Option<Vec<String>>,
    /// Replacement entrypoint, if any.
    pub entrypoint: Option<Vec<String>>,
    /// Network mode, if not the engine default.
    pub network: Option<String>,
    /// Container TCP ports to publish on ephemeral host ports.
    pub publish: Vec<u16>,
    /// Host address published ports bind to.
    pub bind_host: String,
}

impl CreateRequest {
    /// Full argv of the main process when the entrypoint is replaced.
    #[must_use]
    pub fn override_argv(&self) -> Option<Vec<String>> {
        self.entrypoint.as_ref().map(|entrypoint| {
            entrypoint
                .iter()
                .chain(self.command.iter().flatten())
                .cloned()
                .collect()
        })
    }
}

/// Process state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Created, not started.
    Created,
    /// Main process running.
    Running,
    /// Paused by the engine.
    Paused,
    /// Being restarted by a restart policy.
    Restarting,
    /// Being removed.
    Removing,
    /// Main process exited.
    Exited,
    /// The engine failed to stop or remove it.
    Dead,
    /// A state string the harness does not recognise.
    Unknown,
}

impl EngineState {
    /// Parses the engine's state string (`running`, `exited`, ...).
    #[must_use]
    pub fn parse(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" | "stopped" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of a container as reported by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Process state.
    pub state: EngineState,
    /// Exit code once the process has exited.
    pub exit_code: Option<i32>,
    /// Engine-level error message (failed exec of the entrypoint, ...).
    pub error: Option<String>,
    /// Whether the kernel OOM killer ended the process.
    pub oom_killed: bool,
    /// When the main process started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the main process exited.
    pub finished_at: Option<DateTime<Utc>>,
    /// Container port → bound host port.
    pub ports: BTreeMap<u16, u16>,
}

impl ContainerStatus {
    /// A status with only the state set.
    #[must_use]
    pub const fn new(state: EngineState) -> Self {
        Self {
            state,
            exit_code: None,
            error: None,
            oom_killed: false,
            started_at: None,
            finished_at: None,
            ports: BTreeMap::new(),
        }
    }

    /// Returns whether the main process is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    /// Returns whether the main process has ended.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        matches!(self.state, EngineState::Exited | EngineState::Dead)
    }

    /// One-line description used in diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = self.state.to_string();
        if self.has_exited() {
            if let Some(code) = self.exit_code {
                out.push_str(&format!(" with code {code}"));
            }
        }
        if let (Some(started), Some(finished)) = (self.started_at, self.finished_at) {
            if finished >= started {
                let ms = (finished - started).num_milliseconds();
                out.push_str(&format!(" after {ms} ms"));
            }
        }
        if self.oom_killed {
            out.push_str(" (OOM killed)");
        }
        if let Some(err) = self.error.as_deref().filter(|e| !e.is_empty()) {
            out.push_str(&format!(": {err}"));
        }
        out
    }
}

/// Container-engine primitives driven by the harness.
///
/// Implementations are shared by concurrent invocations and must not
/// serialize calls beyond what the engine itself requires.
pub trait ContainerEngine: ImageStore {
    /// Short engine name used in logs (`docker`, `podman`, ...).
    fn name(&self) -> &str;

    /// Checks the engine is reachable and returns its version.
    ///
    /// # Errors
    ///
    /// Returns an `Unavailable` engine error if the daemon is unreachable.
    fn ping(&self) -> Result<String>;

    /// Creates (but does not start) a container.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the request is rejected.
    fn create(&self, request: &CreateRequest) -> Result<ContainerId>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the container cannot be started.
    fn start(&self, id: &ContainerId) -> Result<()>;

    /// Reports process state, exit code, and port bindings.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the container cannot be inspected.
    fn inspect(&self, id: &ContainerId) -> Result<ContainerStatus>;

    /// Runs `argv` inside the running container, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the command could not be executed at all
    /// (container not running, timeout). A command that runs and exits
    /// nonzero is not an error.
    fn exec(&self, id: &ContainerId, argv: &[String], timeout: Duration) -> Result<ExecOutput>;

    /// Fetches container logs, optionally only the last `tail` lines.
    ///
    /// # Errors
    ///
    /// Returns an engine error if logs cannot be retrieved.
    fn logs(&self, id: &ContainerId, tail: Option<usize>) -> Result<ContainerLogs>;

    /// Stops the main process, killing it after `grace`.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the container cannot be stopped.
    fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()>;

    /// Force-removes the container and its anonymous volumes.
    ///
    /// Removing a container that no longer exists succeeds.
    ///
    /// # Errors
    ///
    /// Returns an engine error if removal fails.
    fn remove(&self, id: &ContainerId) -> Result<()>;
}

/// Opens the CLI engine named in `config`, or the first one on `PATH`.
///
/// # Errors
///
/// Returns an `Unavailable` engine error if no engine CLI is found or the
/// daemon does not answer.
pub fn connect(config: &HarnessConfig) -> Result<Arc<dyn ContainerEngine>> {
    let engine = cli::CliEngine::detect(config)?;
    let version = engine.ping()?;
    tracing::info!(engine = engine.name(), %version, "container engine connected");
    Ok(Arc::new(engine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_state_parses_docker_and_podman_names() {
        assert_eq!(EngineState::parse("running"), EngineState::Running);
        assert_eq!(EngineState::parse("Exited"), EngineState::Exited);
        assert_eq!(EngineState::parse("stopped"), EngineState::Exited);
        assert_eq!(EngineState::parse("configured"), EngineState::Created);
        assert_eq!(EngineState::parse("weird"), EngineState::Unknown);
    }

    #[test]
    fn override_argv_joins_entrypoint_and_command() {
        let request = CreateRequest {
            entrypoint: Some(vec!["/bin/busybox".into()]),
            command: Some(vec!["--list".into()]),
            ..CreateRequest::default()
        };
        assert_eq!(
            request.override_argv(),
            Some(vec!["/bin/busybox".to_string(), "--list".to_string()])
        );
        assert_eq!(CreateRequest::default().override_argv(), None);
    }

    #[test]
    fn describe_reports_exit_code_and_oom() {
        let status = ContainerStatus {
            exit_code: Some(137),
            oom_killed: true,
            ..ContainerStatus::new(EngineState::Exited)
        };
        assert_eq!(status.describe(), "exited with code 137 (OOM killed)");
        assert_eq!(ContainerStatus::new(EngineState::Running).describe(), "running");
    }
}
