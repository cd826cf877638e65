//! `boxcheck cmd`: check the exit code of a command run in place of the
//! entrypoint.

use std::time::Duration;

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::context::Context;
use boxcheck_sdk::ProbeSpec;
use clap::Args;

use super::{ContainerArgs, run_with_harness};
use crate::output::{Summary, parse_duration};

/// Arguments for the `cmd` command.
#[derive(Args, Debug)]
pub struct CmdArgs {
    /// Image reference to test.
    pub image: String,

    /// Expect a nonzero exit code instead of `--exit-code`.
    #[arg(long, conflicts_with = "exit_code")]
    pub fails: bool,

    /// Expected exit code.
    #[arg(long, default_value_t = 0)]
    pub exit_code: i32,

    /// Bound on the command (`500ms`, `30s`, `2m`).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Container overrides. A replacement entrypoint is ignored; the
    /// command itself becomes the process.
    #[command(flatten)]
    pub container: ContainerArgs,

    /// Program and arguments, after `--`.
    #[arg(last = true, required = true)]
    pub argv: Vec<String>,
}

impl CmdArgs {
    fn probe(&self) -> ProbeSpec {
        if self.fails {
            ProbeSpec::command_fails(self.argv.clone())
        } else {
            ProbeSpec::CommandSucceeds {
                argv: self.argv.clone(),
                exit_code: self.exit_code,
            }
        }
    }
}

/// Executes the `cmd` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached.
pub fn execute(ctx: &Context, mut config: HarnessConfig, args: &CmdArgs) -> anyhow::Result<Summary> {
    if let Some(timeout) = args.timeout {
        config.command_timeout_secs = timeout.as_secs().max(1);
    }
    let probe = args.probe();
    let overrides = args.container.to_config();

    run_with_harness(config, |harness| {
        let image = harness.get_test_image(&args.image);
        vec![harness.run_probe(ctx, &image, &probe, overrides.as_ref())]
    })
}
