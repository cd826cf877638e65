//! The closed set of probes and their dispatch.

use std::fmt;
use std::time::Duration;

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::constants::{DEFAULT_HTTP_PATH, DEFAULT_HTTP_STATUS};
use boxcheck_common::context::Context;
use boxcheck_common::error::{BoxcheckError, Result};
use boxcheck_runtime::backend::ContainerEngine;
use boxcheck_runtime::lifecycle::ContainerHandle;
use boxcheck_runtime::spec::{self, ContainerConfig, StartSpec};
use serde::{Deserialize, Serialize};

use crate::result::ProbeResult;
use crate::{command, file, http};

/// An HTTP GET expectation against one container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProbe {
    /// Container port to reach.
    pub port: u16,
    /// Request path.
    #[serde(default = "default_path")]
    pub path: String,
    /// Expected response status.
    #[serde(default = "default_status")]
    pub status: u16,
    /// Overall deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Overall deadline in whole seconds, read when `timeout_ms` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl HttpProbe {
    /// A probe for `GET /` expecting 200 on `port`.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            path: default_path(),
            status: default_status(),
            timeout_ms: None,
            timeout_secs: None,
        }
    }

    /// Sets the request path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the expected status.
    #[must_use]
    pub const fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self.timeout_secs = None;
        self
    }

    /// The probe's own deadline; the harness default applies when `None`.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.timeout_ms
            .map(Duration::from_millis)
            .or_else(|| self.timeout_secs.map(Duration::from_secs))
    }

    /// Request path with a leading slash.
    #[must_use]
    pub fn normalized_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

fn default_path() -> String {
    DEFAULT_HTTP_PATH.to_string()
}

const fn default_status() -> u16 {
    DEFAULT_HTTP_STATUS
}

/// One externally observable fact to check about a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProbeSpec {
    /// A port answers HTTP with the expected status.
    Http(HttpProbe),
    /// A path exists inside the container.
    FileExists {
        /// Absolute path inside the container.
        path: String,
    },
    /// A command run in place of the entrypoint exits with `exit_code`.
    CommandSucceeds {
        /// Program and arguments.
        argv: Vec<String>,
        /// Expected exit code.
        #[serde(default)]
        exit_code: i32,
    },
    /// A command run in place of the entrypoint exits nonzero.
    CommandFails {
        /// Program and arguments.
        argv: Vec<String>,
    },
}

impl ProbeSpec {
    /// An HTTP probe.
    #[must_use]
    pub const fn http(probe: HttpProbe) -> Self {
        Self::Http(probe)
    }

    /// A file-exists probe.
    #[must_use]
    pub fn file_exists(path: impl Into<String>) -> Self {
        Self::FileExists { path: path.into() }
    }

    /// A command probe expecting exit code 0.
    #[must_use]
    pub fn command_succeeds<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::CommandSucceeds {
            argv: argv.into_iter().map(Into::into).collect(),
            exit_code: 0,
        }
    }

    /// A command probe expecting a nonzero exit code.
    #[must_use]
    pub fn command_fails<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::CommandFails {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Short kind name used in logs and summaries.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::FileExists { .. } => "file-exists",
            Self::CommandSucceeds { .. } => "command-succeeds",
            Self::CommandFails { .. } => "command-fails",
        }
    }

    /// Container ports the probe needs published.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        match self {
            Self::Http(probe) => vec![probe.port],
            _ => Vec::new(),
        }
    }

    /// Checks the probe is well formed before any container is created.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::Config` for an empty argv, a zero port, a
    /// relative file path, or a status outside 100..=599.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Http(probe) if probe.port == 0 => Err(BoxcheckError::config("http probe port must not be 0")),
            Self::Http(probe) if !(100..=599).contains(&probe.status) => Err(BoxcheckError::config(format!(
                "http probe status {} is not a valid HTTP status",
                probe.status
            ))),
            Self::FileExists { path } if !path.starts_with('/') => Err(BoxcheckError::config(format!(
                "file probe path {path:?} must be absolute"
            ))),
            Self::CommandSucceeds { argv, .. } | Self::CommandFails { argv } if argv.is_empty() => {
                Err(BoxcheckError::config("command probe needs at least a program"))
            }
            _ => Ok(()),
        }
    }

    /// Merges the caller's overrides with what this probe needs to launch.
    ///
    /// File probes keep the container alive with the keep-alive entrypoint
    /// unless the caller chose the process. Command probes always run their
    /// argv as the process; the caller's environment and network still apply.
    #[must_use]
    pub fn launch_spec(&self, overrides: Option<&ContainerConfig>, settings: &ProbeSettings) -> StartSpec {
        let mut start = spec::merge(&StartSpec::default(), overrides);
        match self {
            Self::Http(_) => {}
            Self::FileExists { .. } => {
                if !overrides.is_some_and(ContainerConfig::overrides_process) {
                    start.entrypoint = Some(settings.keep_alive_entrypoint.clone());
                    start.command = None;
                }
            }
            Self::CommandSucceeds { argv, .. } | Self::CommandFails { argv } => {
                if overrides.is_some_and(ContainerConfig::overrides_process) {
                    tracing::debug!(probe = self.kind(), "command probe replaces the overridden process");
                }
                start.entrypoint = Some(argv.clone());
                start.command = None;
            }
        }
        start
    }

    /// Polls `handle` until the probe resolves.
    ///
    /// Never returns an error: engine failures, timeouts and cancellation
    /// are all recorded in the result's verdict.
    #[must_use]
    pub fn resolve(
        &self,
        ctx: &Context,
        engine: &dyn ContainerEngine,
        handle: &ContainerHandle,
        settings: &ProbeSettings,
    ) -> ProbeResult {
        let span = tracing::debug_span!("probe", kind = self.kind(), id = handle.id.short());
        let _entered = span.enter();
        match self {
            Self::Http(probe) => http::resolve(ctx, engine, handle, probe, settings),
            Self::FileExists { path } => file::resolve(ctx, engine, handle, path, settings),
            Self::CommandSucceeds { argv, exit_code } => command::resolve(
                ctx,
                engine,
                handle,
                command::Expectation::ExitCode(*exit_code),
                argv,
                settings,
            ),
            Self::CommandFails { argv } => {
                command::resolve(ctx, engine, handle, command::Expectation::Nonzero, argv, settings)
            }
        }
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(probe) => write!(
                f,
                "GET :{}{} expecting {}",
                probe.port,
                probe.normalized_path(),
                probe.status
            ),
            Self::FileExists { path } => write!(f, "file {path} exists"),
            Self::CommandSucceeds { argv, exit_code } => {
                write!(f, "`{}` exits {exit_code}", argv.join(" "))
            }
            Self::CommandFails { argv } => write!(f, "`{}` exits nonzero", argv.join(" ")),
        }
    }
}

/// Timing and defaults shared by all probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// HTTP deadline when the probe sets none.
    pub http_timeout: Duration,
    /// Pause between HTTP attempts.
    pub http_retry_interval: Duration,
    /// Bound on command and file checks.
    pub command_timeout: Duration,
    /// Log lines included in diagnostics.
    pub log_tail_lines: usize,
    /// Entrypoint that keeps a container alive for file checks.
    pub keep_alive_entrypoint: Vec<String>,
    /// Host used to reach published ports.
    pub connect_host: String,
}

impl From<&HarnessConfig> for ProbeSettings {
    fn from(config: &HarnessConfig) -> Self {
        let connect_host = match config.bind_host.as_str() {
            "" | "0.0.0.0" => "127.0.0.1".to_string(),
            "::" => "[::1]".to_string(),
            host if host.contains(':') && !host.starts_with('[') => format!("[{host}]"),
            host => host.to_string(),
        };
        Self {
            http_timeout: config.http_timeout(),
            http_retry_interval: config.http_retry_interval(),
            command_timeout: config.command_timeout(),
            log_tail_lines: config.log_tail_lines,
            keep_alive_entrypoint: config.keep_alive_entrypoint.clone(),
            connect_host,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}
