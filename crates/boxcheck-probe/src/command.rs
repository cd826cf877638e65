//! Command exit-code probes.
//!
//! The command already ran as the container's process (see
//! [`ProbeSpec::launch_spec`](crate::ProbeSpec::launch_spec)); this waits for
//! it to exit within the command timeout and checks the exit code.

use std::time::Duration;

use boxcheck_common::context::{Context, Interruption};
use boxcheck_runtime::backend::ContainerEngine;
use boxcheck_runtime::exec::ExecOutput;
use boxcheck_runtime::lifecycle::ContainerHandle;

use crate::probe::ProbeSettings;
use crate::result::{FailureCause, ProbeResult, Tally, Verdict};

/// Pause between exit checks.
const EXIT_POLL_MS: u64 = 100;

/// What exit code passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Exactly this code.
    ExitCode(i32),
    /// Any nonzero code.
    Nonzero,
}

impl Expectation {
    /// Returns whether `code` satisfies the expectation.
    #[must_use]
    pub const fn accepts(self, code: i32) -> bool {
        match self {
            Self::ExitCode(expected) => code == expected,
            Self::Nonzero => code != 0,
        }
    }

    fn describe(self) -> String {
        match self {
            Self::ExitCode(expected) => format!("exit code {expected}"),
            Self::Nonzero => "a nonzero exit code".into(),
        }
    }
}

pub(crate) fn resolve(
    ctx: &Context,
    engine: &dyn ContainerEngine,
    handle: &ContainerHandle,
    expectation: Expectation,
    argv: &[String],
    settings: &ProbeSettings,
) -> ProbeResult {
    let mut tally = Tally::new(format!("`{}`", argv.join(" ")));
    let ctx = ctx.with_timeout(settings.command_timeout);

    let status = loop {
        let _ = tally.attempt();
        match engine.inspect(&handle.id) {
            Ok(status) if status.has_exited() => break status,
            Ok(status) => tally.observe(format!("process still {}", status.state)),
            Err(e) => return tally.fail(FailureCause::from_error(&e)),
        }
        if let Err(interruption) = ctx.sleep(Duration::from_millis(EXIT_POLL_MS)) {
            let last_error = tally.last_observation().unwrap_or("process never observed").to_string();
            tracing::debug!(probe = tally.probe(), attempts = tally.attempts(), %interruption, "command did not exit");
            return tally.fail(FailureCause::Timeout {
                last_error,
                cancelled: interruption == Interruption::Cancelled,
            });
        }
    };

    let Some(code) = status.exit_code else {
        return tally.fail(FailureCause::ContainerExited {
            status: status.describe(),
        });
    };
    tally.observe(format!("exit code {code}"));

    match engine.logs(&handle.id, None) {
        Ok(logs) => tally.capture(ExecOutput {
            stdout: logs.stdout,
            stderr: logs.stderr,
            exit_code: code,
        }),
        Err(e) => tracing::debug!(error = %e, "cannot capture command output"),
    }

    if expectation.accepts(code) {
        tally.finish(Verdict::Pass)
    } else {
        tally.fail(FailureCause::Unexpected {
            expected: expectation.describe(),
            actual: format!("exit code {code}"),
        })
    }
}
