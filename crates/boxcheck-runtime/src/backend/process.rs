//! Bounded execution of engine CLI commands.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use boxcheck_common::error::{BoxcheckError, Result};

/// Poll interval while waiting for a child to exit.
const WAIT_POLL_MS: u64 = 10;

/// Captured result of one CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal or on timeout.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Whether the command was killed for exceeding its bound.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Returns whether the command exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs `program` with `args`, killing it once `timeout` elapses.
///
/// # Errors
///
/// Returns `BoxcheckError::Io` if the program cannot be spawned.
pub fn run(program: &Path, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    tracing::trace!(program = %program.display(), ?args, "running engine command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BoxcheckError::Io {
            path: program.to_path_buf(),
            source: e,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let (status, timed_out) = wait_bounded(&mut child, timeout).map_err(|e| BoxcheckError::Io {
        path: program.to_path_buf(),
        source: e,
    })?;

    Ok(CommandOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
        timed_out,
    })
}

fn wait_bounded(child: &mut Child, timeout: Duration) -> std::io::Result<(Option<i32>, bool)> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code(), false));
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait()?;
            return Ok((None, true));
        }
        std::thread::sleep(Duration::from_millis(WAIT_POLL_MS));
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
