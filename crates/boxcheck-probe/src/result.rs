//! Structured probe outcomes.

use std::fmt;
use std::time::Duration;

use boxcheck_common::error::{BoxcheckError, EngineErrorKind};
use boxcheck_runtime::exec::ExecOutput;

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// No definitive answer before the deadline or cancellation.
    Timeout {
        /// Last connection error or observed state.
        last_error: String,
        /// Whether the context was cancelled rather than expired.
        cancelled: bool,
    },
    /// A definitive answer that does not match the expectation.
    Unexpected {
        /// What would have passed.
        expected: String,
        /// What was observed.
        actual: String,
    },
    /// The container's main process exited while it was expected to serve.
    ContainerExited {
        /// Engine description of the exit (`exited with code 1`, ...).
        status: String,
    },
    /// The engine failed to carry out the check.
    Engine {
        /// Primitive that failed.
        operation: &'static str,
        /// Classified cause.
        kind: EngineErrorKind,
        /// Engine message.
        message: String,
    },
}

impl FailureCause {
    /// Wraps an engine error as a failure cause.
    #[must_use]
    pub fn from_error(err: &BoxcheckError) -> Self {
        match err {
            BoxcheckError::Engine {
                operation,
                kind,
                message,
            } => Self::Engine {
                operation: *operation,
                kind: *kind,
                message: message.clone(),
            },
            other => Self::Engine {
                operation: "probe",
                kind: EngineErrorKind::Rejected,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout {
                last_error,
                cancelled: true,
            } => write!(f, "cancelled, last observed: {last_error}"),
            Self::Timeout { last_error, .. } => write!(f, "no answer, last observed: {last_error}"),
            Self::Unexpected { expected, actual } => write!(f, "expected {expected}, got {actual}"),
            Self::ContainerExited { status } => write!(f, "container {status}"),
            Self::Engine { operation, message, .. } => write!(f, "engine {operation} failed: {message}"),
        }
    }
}

/// Pass, or fail with a cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The expectation held.
    Pass,
    /// The expectation did not hold.
    Fail(FailureCause),
}

/// Outcome of resolving one probe against one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Human-readable probe description.
    pub probe: String,
    /// Pass or fail.
    pub verdict: Verdict,
    /// Time spent resolving.
    pub elapsed: Duration,
    /// Number of attempts made.
    pub attempts: u32,
    /// Last observed error or status.
    pub last_observation: Option<String>,
    /// Output captured from the checked command, if any.
    pub output: Option<ExecOutput>,
}

impl ProbeResult {
    /// Returns whether the probe passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    /// Returns the failure cause, if the probe failed.
    #[must_use]
    pub const fn cause(&self) -> Option<&FailureCause> {
        match &self.verdict {
            Verdict::Pass => None,
            Verdict::Fail(cause) => Some(cause),
        }
    }

    /// Returns whether the probe never received any definitive answer.
    #[must_use]
    pub const fn never_answered(&self) -> bool {
        matches!(
            self.verdict,
            Verdict::Fail(FailureCause::Timeout { .. } | FailureCause::ContainerExited { .. })
        )
    }

    /// Converts a failure into the workspace error taxonomy.
    #[must_use]
    pub fn to_error(&self) -> Option<BoxcheckError> {
        let cause = self.cause()?;
        Some(match cause {
            FailureCause::Timeout { last_error, .. } => BoxcheckError::ProbeTimeout {
                probe: self.probe.clone(),
                elapsed: self.elapsed,
                last_observed: last_error.clone(),
            },
            FailureCause::Unexpected { expected, actual } => BoxcheckError::UnexpectedResult {
                probe: self.probe.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            FailureCause::ContainerExited { status } => BoxcheckError::UnexpectedResult {
                probe: self.probe.clone(),
                expected: "a running container".into(),
                actual: format!("container {status}"),
            },
            FailureCause::Engine {
                operation,
                kind,
                message,
            } => BoxcheckError::engine(*operation, *kind, message.clone()),
        })
    }
}

/// Accumulates attempts and observations while a probe polls.
#[derive(Debug)]
pub(crate) struct Tally {
    probe: String,
    started: std::time::Instant,
    attempts: u32,
    last_observation: Option<String>,
    output: Option<ExecOutput>,
}

impl Tally {
    pub(crate) fn new(probe: String) -> Self {
        Self {
            probe,
            started: std::time::Instant::now(),
            attempts: 0,
            last_observation: None,
            output: None,
        }
    }

    pub(crate) fn probe(&self) -> &str {
        &self.probe
    }

    pub(crate) const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub(crate) fn observe(&mut self, observation: impl Into<String>) {
        self.last_observation = Some(observation.into());
    }

    pub(crate) fn last_observation(&self) -> Option<&str> {
        self.last_observation.as_deref()
    }

    pub(crate) fn capture(&mut self, output: ExecOutput) {
        self.output = Some(output);
    }

    pub(crate) fn finish(self, verdict: Verdict) -> ProbeResult {
        let elapsed = self.started.elapsed();
        match &verdict {
            Verdict::Pass => {
                tracing::info!(probe = %self.probe, attempts = self.attempts, ?elapsed, "probe passed");
            }
            Verdict::Fail(cause) => {
                tracing::info!(probe = %self.probe, attempts = self.attempts, ?elapsed, %cause, "probe failed");
            }
        }
        ProbeResult {
            probe: self.probe,
            verdict,
            elapsed,
            attempts: self.attempts,
            last_observation: self.last_observation,
            output: self.output,
        }
    }

    pub(crate) fn fail(self, cause: FailureCause) -> ProbeResult {
        self.finish(Verdict::Fail(cause))
    }
}
