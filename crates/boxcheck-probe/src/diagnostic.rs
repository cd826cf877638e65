//! Failure diagnostics.
//!
//! Gathers what a reader needs to understand a failed probe: the probe's
//! own error, the container's exit state, captured command output, and the
//! tail of the container logs. State and log retrieval are best effort;
//! their failures are noted and never replace the probe error.

use std::fmt;

use boxcheck_runtime::backend::ContainerEngine;
use boxcheck_runtime::lifecycle::ContainerHandle;

use crate::result::ProbeResult;

/// One consolidated failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The probe error, rendered.
    pub cause: String,
    /// Container name, short ID and image.
    pub container: String,
    /// Engine state of the container at report time.
    pub state: Option<String>,
    /// Output captured from the checked command.
    pub output: Option<String>,
    /// Last log lines of the container.
    pub logs: Option<String>,
    /// Number of log lines requested.
    pub log_lines: usize,
    /// Problems met while gathering the above.
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// A diagnostic carrying only an error message, for failures that
    /// happen before any container exists.
    #[must_use]
    pub fn bare(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            container: String::new(),
            state: None,
            output: None,
            logs: None,
            log_lines: 0,
            notes: Vec::new(),
        }
    }
}

/// Builds the diagnostic for a failed `result` on `handle`.
#[must_use]
pub fn report(engine: &dyn ContainerEngine, handle: &ContainerHandle, result: &ProbeResult, tail: usize) -> Diagnostic {
    let cause = result
        .to_error()
        .map_or_else(|| format!("{} passed", result.probe), |e| e.to_string());
    let mut diagnostic = Diagnostic {
        cause,
        container: handle.to_string(),
        log_lines: tail,
        ..Diagnostic::bare("")
    };

    match engine.inspect(&handle.id) {
        Ok(status) => diagnostic.state = Some(status.describe()),
        Err(e) => diagnostic.notes.push(format!("container state unavailable: {e}")),
    }

    if let Some(output) = result.output.as_ref().map(|o| o.combined()) {
        if !output.is_empty() {
            diagnostic.output = Some(boxcheck_runtime::logs::tail_lines(&output, tail));
        }
    }

    match engine.logs(&handle.id, Some(tail)) {
        Ok(logs) if logs.is_empty() => diagnostic.notes.push("container wrote no logs".into()),
        Ok(logs) => diagnostic.logs = Some(logs.tail(tail)),
        Err(e) => diagnostic.notes.push(format!("container logs unavailable: {e}")),
    }

    tracing::debug!(container = %diagnostic.container, notes = diagnostic.notes.len(), "diagnostic gathered");
    diagnostic
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)?;
        if !self.container.is_empty() {
            write!(f, "\n  container: {}", self.container)?;
        }
        if let Some(state) = &self.state {
            write!(f, "\n  state: {state}")?;
        }
        if let Some(output) = &self.output {
            write!(f, "\n  command output:")?;
            write_indented(f, output)?;
        }
        if let Some(logs) = &self.logs {
            write!(f, "\n  last {} log lines:", self.log_lines)?;
            write_indented(f, logs)?;
        }
        for note in &self.notes {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    for line in text.lines() {
        write!(f, "\n    {line}")?;
    }
    Ok(())
}
