//! In-memory engine driven by per-image scripts.
//!
//! Stands in for a container daemon in tests. Each image is described by an
//! [`ImageScript`]: which files it contains, how scripted commands exit, and
//! how its default process behaves. Every container created is counted so
//! tests can assert that teardown removed it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use boxcheck_common::error::{BoxcheckError, EngineErrorKind, Result};
use boxcheck_common::types::{ContainerId, ImageId};
use boxcheck_image::ImageStore;

use super::{ContainerEngine, ContainerStatus, CreateRequest, EngineState};
use crate::exec::ExecOutput;
use crate::logs::{self, ContainerLogs};

/// First host port handed out for published ports.
const FIRST_EPHEMERAL_PORT: u16 = 49152;
/// Exit code of a process whose executable does not exist.
const NOT_FOUND_EXIT: i32 = 127;
/// Exit code of a process killed by `stop`.
const KILLED_EXIT: i32 = 137;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScriptedCommand {
    argv: Vec<String>,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// Behaviour of one scripted image.
#[derive(Debug, Clone, Default)]
pub struct ImageScript {
    files: BTreeSet<String>,
    commands: Vec<ScriptedCommand>,
    exit_code: Option<i32>,
    logs: Vec<String>,
    required_env: BTreeMap<String, String>,
    fixed_ports: BTreeMap<u16, u16>,
    start_error: Option<String>,
    stuck: bool,
}

impl ImageScript {
    /// An image whose default process runs forever and contains no files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file visible to `test -e`.
    #[must_use]
    pub fn with_file(mut self, path: &str) -> Self {
        let _ = self.files.insert(path.to_string());
        self
    }

    /// Scripts the result of running `argv`, either via exec or as the
    /// replaced entrypoint.
    #[must_use]
    pub fn with_command(mut self, argv: &[&str], exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.commands.push(ScriptedCommand {
            argv: argv.iter().map(ToString::to_string).collect(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
        self
    }

    /// Makes the default process exit immediately with `code`.
    #[must_use]
    pub const fn exits_with(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Adds a line the default process writes to stdout on start.
    #[must_use]
    pub fn with_log(mut self, line: &str) -> Self {
        self.logs.push(line.to_string());
        self
    }

    /// Makes the default process exit with code 1 unless `key=value` is set.
    #[must_use]
    pub fn requires_env(mut self, key: &str, value: &str) -> Self {
        let _ = self.required_env.insert(key.to_string(), value.to_string());
        self
    }

    /// Binds `container_port` to a fixed `host_port` instead of an
    /// allocated one, so a test server can answer for the container.
    #[must_use]
    pub fn publishes(mut self, container_port: u16, host_port: u16) -> Self {
        let _ = self.fixed_ports.insert(container_port, host_port);
        self
    }

    /// Makes `start` fail with `message`.
    #[must_use]
    pub fn rejects_start(mut self, message: &str) -> Self {
        self.start_error = Some(message.to_string());
        self
    }

    /// Makes the container stay `created` after a successful `start`.
    #[must_use]
    pub const fn stuck_in_created(mut self) -> Self {
        self.stuck = true;
        self
    }

    fn command(&self, argv: &[String]) -> Option<&ScriptedCommand> {
        self.commands.iter().find(|c| c.argv == argv)
    }
}

#[derive(Debug)]
struct ImageEntry {
    id: ImageId,
    script: ImageScript,
    local: bool,
}

#[derive(Debug)]
struct FakeContainer {
    request: CreateRequest,
    script: ImageScript,
    status: ContainerStatus,
    logs: ContainerLogs,
}

#[derive(Debug, Default)]
struct Book {
    images: HashMap<String, ImageEntry>,
    pull_failures: HashMap<String, EngineErrorKind>,
    remove_failure: Option<String>,
    containers: HashMap<ContainerId, FakeContainer>,
    requests: Vec<CreateRequest>,
    next_container: u64,
    next_port: u16,
    created: usize,
    removed: usize,
    pulls: usize,
}

/// Scripted engine keeping all state in memory.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    book: Mutex<Book>,
}

impl ScriptedEngine {
    /// An engine with no images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image that is already present locally.
    #[must_use]
    pub fn with_image(self, reference: &str, script: ImageScript) -> Self {
        self.add_image(reference, script, true);
        self
    }

    /// Registers an image that exists only in the registry until pulled.
    #[must_use]
    pub fn with_remote_image(self, reference: &str, script: ImageScript) -> Self {
        self.add_image(reference, script, false);
        self
    }

    /// Makes pulls of `reference` fail with `kind`.
    #[must_use]
    pub fn failing_pull(self, reference: &str, kind: EngineErrorKind) -> Self {
        let _ = self.lock().pull_failures.insert(reference.to_string(), kind);
        self
    }

    /// Makes every `remove` fail with `message`.
    #[must_use]
    pub fn failing_remove(self, message: &str) -> Self {
        self.lock().remove_failure = Some(message.to_string());
        self
    }

    /// Number of containers created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.lock().created
    }

    /// Number of containers removed.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.lock().removed
    }

    /// Number of containers that still exist.
    #[must_use]
    pub fn live(&self) -> usize {
        self.lock().containers.len()
    }

    /// Number of pull calls.
    #[must_use]
    pub fn pulls(&self) -> usize {
        self.lock().pulls
    }

    /// The most recent create request.
    #[must_use]
    pub fn last_request(&self) -> Option<CreateRequest> {
        self.lock().requests.last().cloned()
    }

    /// Every create request, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<CreateRequest> {
        self.lock().requests.clone()
    }

    fn add_image(&self, reference: &str, script: ImageScript, local: bool) {
        let mut book = self.lock();
        let id = ImageId::new(format!("sha256:{:064x}", book.images.len() + 1));
        let _ = book
            .images
            .insert(reference.to_string(), ImageEntry { id, script, local });
    }

    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Book {
    fn container(&mut self, operation: &'static str, id: &ContainerId) -> Result<&mut FakeContainer> {
        self.containers.get_mut(id).ok_or_else(|| {
            BoxcheckError::engine(operation, EngineErrorKind::NotFound, format!("no such container: {id}"))
        })
    }

    fn allocate_port(&mut self) -> u16 {
        if self.next_port < FIRST_EPHEMERAL_PORT {
            self.next_port = FIRST_EPHEMERAL_PORT;
        }
        let port = self.next_port;
        self.next_port = self.next_port.wrapping_add(1);
        port
    }
}

impl ImageStore for ScriptedEngine {
    fn inspect_image(&self, reference: &str) -> Result<Option<ImageId>> {
        let book = self.lock();
        Ok(book
            .images
            .get(reference)
            .filter(|entry| entry.local)
            .map(|entry| entry.id.clone()))
    }

    fn pull(&self, reference: &str) -> Result<()> {
        let mut book = self.lock();
        book.pulls += 1;
        if let Some(kind) = book.pull_failures.get(reference) {
            return Err(BoxcheckError::engine("pull", *kind, format!("pull {reference}: {kind}")));
        }
        match book.images.get_mut(reference) {
            Some(entry) => {
                entry.local = true;
                Ok(())
            }
            None => Err(BoxcheckError::engine(
                "pull",
                EngineErrorKind::NotFound,
                format!("manifest for {reference} not found: manifest unknown"),
            )),
        }
    }
}

impl ContainerEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn ping(&self) -> Result<String> {
        Ok("scripted".into())
    }

    fn create(&self, request: &CreateRequest) -> Result<ContainerId> {
        let mut book = self.lock();
        let script = match book.images.get(&request.image) {
            Some(entry) if entry.local => entry.script.clone(),
            _ => {
                return Err(BoxcheckError::engine(
                    "create",
                    EngineErrorKind::NotFound,
                    format!("No such image: {}", request.image),
                ));
            }
        };
        if book.containers.values().any(|c| c.request.name == request.name) {
            return Err(BoxcheckError::engine(
                "create",
                EngineErrorKind::Rejected,
                format!("container name {} is already in use", request.name),
            ));
        }

        book.next_container += 1;
        let id = ContainerId::new(format!("{:064x}", book.next_container));
        book.created += 1;
        book.requests.push(request.clone());
        let _ = book.containers.insert(
            id.clone(),
            FakeContainer {
                request: request.clone(),
                script,
                status: ContainerStatus::new(EngineState::Created),
                logs: ContainerLogs::default(),
            },
        );
        Ok(id)
    }

    fn start(&self, id: &ContainerId) -> Result<()> {
        let mut book = self.lock();
        let container = book.container("start", id)?;
        if let Some(message) = &container.script.start_error {
            return Err(BoxcheckError::engine("start", EngineErrorKind::Rejected, message.clone()));
        }
        if container.script.stuck {
            return Ok(());
        }

        let (state, exit_code) = launch(container);
        container.status.state = state;
        container.status.exit_code = exit_code;
        if state != EngineState::Running {
            return Ok(());
        }

        let publish = container.request.publish.clone();
        let fixed = container.script.fixed_ports.clone();
        let mut ports = BTreeMap::new();
        for port in publish {
            let host = match fixed.get(&port) {
                Some(host) => *host,
                None => book.allocate_port(),
            };
            let _ = ports.insert(port, host);
        }
        book.container("start", id)?.status.ports = ports;
        Ok(())
    }

    fn inspect(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let mut book = self.lock();
        let container = book.container("inspect", id)?;
        let mut status = container.status.clone();
        if !status.is_running() {
            status.ports.clear();
        }
        Ok(status)
    }

    fn exec(&self, id: &ContainerId, argv: &[String], _timeout: Duration) -> Result<ExecOutput> {
        let mut book = self.lock();
        let container = book.container("exec", id)?;
        if !container.status.is_running() {
            return Err(BoxcheckError::engine(
                "exec",
                EngineErrorKind::Rejected,
                format!("container {} is not running", id.short()),
            ));
        }

        if let [test, flag, path] = argv {
            if test == "test" && flag == "-e" {
                let exit_code = i32::from(!container.script.files.contains(path));
                return Ok(ExecOutput {
                    exit_code,
                    ..ExecOutput::default()
                });
            }
        }
        Ok(match container.script.command(argv) {
            Some(command) => ExecOutput {
                stdout: command.stdout.clone(),
                stderr: command.stderr.clone(),
                exit_code: command.exit_code,
            },
            None => not_found(argv),
        })
    }

    fn logs(&self, id: &ContainerId, tail: Option<usize>) -> Result<ContainerLogs> {
        let mut book = self.lock();
        let container = book.container("logs", id)?;
        Ok(match tail {
            Some(lines) => ContainerLogs {
                stdout: logs::tail_lines(&container.logs.stdout, lines),
                stderr: logs::tail_lines(&container.logs.stderr, lines),
            },
            None => container.logs.clone(),
        })
    }

    fn stop(&self, id: &ContainerId, _grace: Duration) -> Result<()> {
        let mut book = self.lock();
        let container = book.container("stop", id)?;
        if container.status.is_running() {
            container.status.state = EngineState::Exited;
            container.status.exit_code = Some(KILLED_EXIT);
        }
        Ok(())
    }

    fn remove(&self, id: &ContainerId) -> Result<()> {
        let mut book = self.lock();
        if let Some(message) = &book.remove_failure {
            return Err(BoxcheckError::engine("remove", EngineErrorKind::Rejected, message.clone()));
        }
        if book.containers.remove(id).is_some() {
            book.removed += 1;
        }
        Ok(())
    }
}

/// Decides what the main process does and records its output.
fn launch(container: &mut FakeContainer) -> (EngineState, Option<i32>) {
    let script = &container.script;
    if let Some(argv) = container.request.override_argv() {
        if argv.first().is_some_and(|program| program == "sleep") {
            return (EngineState::Running, None);
        }
        let output = script.command(&argv).map_or_else(
            || not_found(&argv),
            |command| ExecOutput {
                stdout: command.stdout.clone(),
                stderr: command.stderr.clone(),
                exit_code: command.exit_code,
            },
        );
        append(&mut container.logs.stdout, &output.stdout);
        append(&mut container.logs.stderr, &output.stderr);
        return (EngineState::Exited, Some(output.exit_code));
    }

    for line in &script.logs {
        append(&mut container.logs.stdout, line);
    }
    let missing = script
        .required_env
        .iter()
        .find(|(key, value)| container.request.env.get(*key) != Some(*value));
    if let Some((key, value)) = missing {
        append(
            &mut container.logs.stderr,
            &format!("expected {key}={value}, refusing to start"),
        );
        return (EngineState::Exited, Some(1));
    }
    match script.exit_code {
        Some(code) => (EngineState::Exited, Some(code)),
        None => (EngineState::Running, None),
    }
}

fn not_found(argv: &[String]) -> ExecOutput {
    let program = argv.first().map_or("", String::as_str);
    ExecOutput {
        stdout: String::new(),
        stderr: format!("exec: \"{program}\": executable file not found in $PATH"),
        exit_code: NOT_FOUND_EXIT,
    }
}

fn append(buffer: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    buffer.push_str(text.trim_end_matches('\n'));
    buffer.push('\n');
}
