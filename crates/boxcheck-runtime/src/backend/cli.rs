//! Docker-compatible CLI engine.
//!
//! Drives `docker` or `podman` through their command-line interface. Both
//! accept the same subcommands and inspect output for everything used here.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::constants::ENGINE_CANDIDATES;
use boxcheck_common::error::{BoxcheckError, EngineErrorKind, Result};
use boxcheck_common::types::{ContainerId, ImageId};
use boxcheck_image::ImageStore;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;

use super::process::{self, CommandOutput};
use super::{ContainerEngine, ContainerStatus, CreateRequest, EngineState};
use crate::exec::ExecOutput;
use crate::logs::ContainerLogs;

/// Bound for quick metadata calls (inspect, version, rm).
const QUICK_TIMEOUT_SECS: u64 = 30;
/// Bound for image pulls.
const PULL_TIMEOUT_SECS: u64 = 900;
/// Slack added to the stop grace period before the CLI call is abandoned.
const STOP_SLACK_SECS: u64 = 30;
/// Exit code the CLI uses for its own failures in `run`/`exec`.
const CLI_ERROR_EXIT: i32 = 125;

/// A `docker`/`podman` binary used as the container engine.
#[derive(Debug, Clone)]
pub struct CliEngine {
    program: PathBuf,
    name: String,
}

impl CliEngine {
    /// Wraps an engine binary.
    #[must_use]
    pub fn new(program: PathBuf) -> Self {
        let name = program
            .file_stem()
            .map_or_else(|| "engine".to_string(), |s| s.to_string_lossy().into_owned());
        Self { program, name }
    }

    /// Locates the engine named in `config`, else the first candidate on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an `Unavailable` engine error if no binary is found.
    pub fn detect(config: &HarnessConfig) -> Result<Self> {
        if let Some(engine) = &config.engine {
            let program = which::which(engine).map_err(|e| {
                BoxcheckError::engine(
                    "detect",
                    EngineErrorKind::Unavailable,
                    format!("engine {} not found: {e}", engine.display()),
                )
            })?;
            return Ok(Self::new(program));
        }

        ENGINE_CANDIDATES
            .iter()
            .find_map(|candidate| which::which(candidate).ok())
            .map(Self::new)
            .ok_or_else(|| {
                BoxcheckError::engine(
                    "detect",
                    EngineErrorKind::Unavailable,
                    format!("none of {} found on PATH", ENGINE_CANDIDATES.join(", ")),
                )
            })
    }

    /// Path of the engine binary.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, operation: &'static str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let out = process::run(&self.program, args, timeout)?;
        if out.timed_out {
            return Err(BoxcheckError::engine(
                operation,
                EngineErrorKind::Timeout,
                format!("{} {operation} did not finish within {timeout:?}", self.name),
            ));
        }
        Ok(out)
    }

    fn checked(&self, operation: &'static str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let out = self.run(operation, args, timeout)?;
        if out.success() {
            Ok(out)
        } else {
            Err(failure(operation, &out))
        }
    }
}

impl ImageStore for CliEngine {
    fn inspect_image(&self, reference: &str) -> Result<Option<ImageId>> {
        let args = strings(&["image", "inspect", "--format", "{{.Id}}", reference]);
        match self.checked("image inspect", &args, quick()) {
            Ok(out) => Ok(last_line(&out.stdout).map(ImageId::new)),
            Err(e) if e.engine_kind() == Some(EngineErrorKind::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn pull(&self, reference: &str) -> Result<()> {
        let args = strings(&["pull", "--quiet", reference]);
        let _ = self.checked("pull", &args, Duration::from_secs(PULL_TIMEOUT_SECS))?;
        Ok(())
    }
}

impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> Result<String> {
        let args = strings(&["version", "--format", "{{json .}}"]);
        let out = self.checked("version", &args, quick())?;
        Ok(parse_version(&out.stdout).unwrap_or_else(|| "unknown".into()))
    }

    fn create(&self, request: &CreateRequest) -> Result<ContainerId> {
        let out = self.checked("create", &create_args(request), quick())?;
        last_line(&out.stdout).map(ContainerId::new).ok_or_else(|| {
            BoxcheckError::engine("create", EngineErrorKind::Rejected, "engine returned no container ID")
        })
    }

    fn start(&self, id: &ContainerId) -> Result<()> {
        let _ = self.checked("start", &strings(&["start", id.as_str()]), quick())?;
        Ok(())
    }

    fn inspect(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let args = strings(&["container", "inspect", id.as_str()]);
        let out = self.checked("inspect", &args, quick())?;
        parse_inspect(&out.stdout)
    }

    fn exec(&self, id: &ContainerId, argv: &[String], timeout: Duration) -> Result<ExecOutput> {
        let mut args = strings(&["exec", id.as_str()]);
        args.extend(argv.iter().cloned());
        exec_result(&self.run("exec", &args, timeout)?)
    }

    fn logs(&self, id: &ContainerId, tail: Option<usize>) -> Result<ContainerLogs> {
        let mut args = strings(&["logs"]);
        if let Some(lines) = tail {
            args.extend(["--tail".to_string(), lines.to_string()]);
        }
        args.push(id.to_string());
        let out = self.checked("logs", &args, quick())?;
        Ok(ContainerLogs {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    fn stop(&self, id: &ContainerId, grace: Duration) -> Result<()> {
        let args = strings(&["stop", "--time", &grace.as_secs().to_string(), id.as_str()]);
        let _ = self.checked("stop", &args, grace + Duration::from_secs(STOP_SLACK_SECS))?;
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let args = strings(&["rm", "--force", "--volumes", id.as_str()]);
        match self.checked("remove", &args, quick()) {
            Err(e) if e.engine_kind() == Some(EngineErrorKind::NotFound) => {
                tracing::debug!(container = id.short(), "container already gone");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

/// Builds the `create` argument list for `request`.
///
/// Only the first entrypoint element fits `--entrypoint`; the rest are
/// passed ahead of the command.
#[must_use]
pub fn create_args(request: &CreateRequest) -> Vec<String> {
    let mut args = strings(&["create", "--name", &request.name]);
    for (key, value) in &request.labels {
        args.extend(["--label".into(), format!("{key}={value}")]);
    }
    for (key, value) in &request.env {
        args.extend(["-e".into(), format!("{key}={value}")]);
    }
    for port in &request.publish {
        args.extend(["-p".into(), format!("{}::{port}/tcp", request.bind_host)]);
    }
    if let Some(network) = &request.network {
        args.extend(["--network".into(), network.clone()]);
    }

    let mut trailing = Vec::new();
    if let Some(entrypoint) = &request.entrypoint {
        let (first, rest) = entrypoint
            .split_first()
            .map_or(("", &[][..]), |(first, rest)| (first.as_str(), rest));
        args.extend(["--entrypoint".into(), first.to_string()]);
        trailing.extend(rest.iter().cloned());
    }
    args.push(request.image.clone());
    args.extend(trailing);
    if let Some(command) = &request.command {
        args.extend(command.iter().cloned());
    }
    args
}

/// Maps CLI stderr to an engine error kind.
#[must_use]
pub fn classify(stderr: &str) -> EngineErrorKind {
    const UNAVAILABLE: &[&str] = &[
        "cannot connect to the docker daemon",
        "is the docker daemon running",
        "error during connect",
        "cannot connect to podman",
        "unable to connect to podman",
    ];
    const NETWORK: &[&str] = &[
        "dial tcp",
        "i/o timeout",
        "connection refused",
        "connection reset",
        "no such host",
        "tls handshake",
        "network is unreachable",
    ];
    const NOT_FOUND: &[&str] = &[
        "no such",
        "not found",
        "manifest unknown",
        "does not exist",
        "image not known",
        "failed to find image",
    ];
    const UNAUTHORIZED: &[&str] = &["unauthorized", "denied", "authentication required"];

    let text = stderr.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| text.contains(m));
    if has(UNAVAILABLE) {
        EngineErrorKind::Unavailable
    } else if has(NETWORK) {
        EngineErrorKind::Network
    } else if has(NOT_FOUND) {
        EngineErrorKind::NotFound
    } else if has(UNAUTHORIZED) {
        EngineErrorKind::Unauthorized
    } else {
        EngineErrorKind::Rejected
    }
}

/// Interprets `exec` output, separating engine failures from command results.
///
/// # Errors
///
/// Returns an engine error when the CLI itself could not run the command
/// (container not running, unknown container).
pub fn exec_result(out: &CommandOutput) -> Result<ExecOutput> {
    let engine_failed = out.status == Some(CLI_ERROR_EXIT)
        || out.stderr.trim_start().starts_with("Error response from daemon");
    match out.status {
        Some(code) if !engine_failed => Ok(ExecOutput {
            stdout: out.stdout.clone(),
            stderr: out.stderr.clone(),
            exit_code: code,
        }),
        _ => Err(failure("exec", out)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    network_settings: InspectNetwork,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    status: String,
    exit_code: i32,
    error: String,
    #[serde(rename = "OOMKilled")]
    oom_killed: bool,
    started_at: String,
    finished_at: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectNetwork {
    ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_port: String,
}

/// Parses `container inspect` JSON into a [`ContainerStatus`].
///
/// # Errors
///
/// Returns a serialization error on malformed JSON, or a `NotFound` engine
/// error if the array is empty.
pub fn parse_inspect(json: &str) -> Result<ContainerStatus> {
    let records: Vec<InspectRecord> = serde_json::from_str(json)?;
    let record = records.into_iter().next().ok_or_else(|| {
        BoxcheckError::engine("inspect", EngineErrorKind::NotFound, "inspect returned no containers")
    })?;

    let state = EngineState::parse(&record.state.status);
    let mut ports = BTreeMap::new();
    for (key, bindings) in record.network_settings.ports.unwrap_or_default() {
        let Some(container_port) = key.split('/').next().and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };
        let host_port = bindings
            .unwrap_or_default()
            .iter()
            .find_map(|b| b.host_port.parse::<u16>().ok());
        if let Some(host_port) = host_port {
            let _ = ports.insert(container_port, host_port);
        }
    }

    let exited = matches!(state, EngineState::Exited | EngineState::Dead);
    Ok(ContainerStatus {
        state,
        exit_code: exited.then_some(record.state.exit_code),
        error: Some(record.state.error).filter(|e| !e.is_empty()),
        oom_killed: record.state.oom_killed,
        started_at: timestamp(&record.state.started_at),
        finished_at: timestamp(&record.state.finished_at),
        ports,
    })
}

fn parse_version(json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(json.trim()).ok()?;
    ["/Server/Version", "/Client/Version", "/Version"]
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(serde_json::Value::as_str))
        .map(ToString::to_string)
}

/// Engines report unset times as the zero time in year 1.
fn timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1)
}

fn failure(operation: &'static str, out: &CommandOutput) -> BoxcheckError {
    let message = match out.stderr.trim() {
        "" => format!("exited with {:?}", out.status),
        stderr => stderr.to_string(),
    };
    BoxcheckError::engine(operation, classify(&message), message)
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .map(ToString::to_string)
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(ToString::to_string).collect()
}

const fn quick() -> Duration {
    Duration::from_secs(QUICK_TIMEOUT_SECS)
}
