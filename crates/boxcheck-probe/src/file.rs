//! File-existence probe.

use boxcheck_common::context::{Context, Interruption};
use boxcheck_common::error::EngineErrorKind;
use boxcheck_runtime::backend::ContainerEngine;
use boxcheck_runtime::lifecycle::ContainerHandle;

use crate::probe::ProbeSettings;
use crate::result::{FailureCause, ProbeResult, Tally, Verdict};

/// Runs `test -e <path>` once inside the running container.
pub(crate) fn resolve(
    ctx: &Context,
    engine: &dyn ContainerEngine,
    handle: &ContainerHandle,
    path: &str,
    settings: &ProbeSettings,
) -> ProbeResult {
    let mut tally = Tally::new(format!("file {path}"));
    if let Err(interruption) = ctx.check() {
        return tally.fail(FailureCause::Timeout {
            last_error: interruption.to_string(),
            cancelled: interruption == Interruption::Cancelled,
        });
    }

    let argv = ["test".to_string(), "-e".to_string(), path.to_string()];
    let _ = tally.attempt();
    let output = match engine.exec(&handle.id, &argv, ctx.bound(settings.command_timeout)) {
        Ok(output) => output,
        Err(e) => {
            tally.observe(e.to_string());
            if let Ok(status) = engine.inspect(&handle.id) {
                if status.has_exited() {
                    return tally.fail(FailureCause::ContainerExited {
                        status: status.describe(),
                    });
                }
            }
            if e.engine_kind() == Some(EngineErrorKind::Timeout) {
                return tally.fail(FailureCause::Timeout {
                    last_error: e.to_string(),
                    cancelled: false,
                });
            }
            return tally.fail(FailureCause::from_error(&e));
        }
    };

    let code = output.exit_code;
    tally.observe(format!("test -e exited {code}"));
    if output.succeeded() {
        return tally.finish(Verdict::Pass);
    }
    tally.capture(output);
    tally.fail(FailureCause::Unexpected {
        expected: format!("{path} to exist"),
        actual: format!("test -e {path} exited {code}"),
    })
}
