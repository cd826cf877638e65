//! `boxcheck file`: check that a path exists inside an image.

use std::time::Duration;

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::context::Context;
use clap::Args;

use super::{ContainerArgs, run_with_harness};
use crate::output::{Summary, parse_duration};

/// Arguments for the `file` command.
#[derive(Args, Debug)]
pub struct FileArgs {
    /// Image reference to test.
    pub image: String,

    /// Absolute paths that must exist; each is checked in its own container.
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Bound on each check (`500ms`, `30s`, `2m`).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Container overrides.
    #[command(flatten)]
    pub container: ContainerArgs,
}

/// Executes the `file` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached.
pub fn execute(ctx: &Context, mut config: HarnessConfig, args: &FileArgs) -> anyhow::Result<Summary> {
    if let Some(timeout) = args.timeout {
        config.command_timeout_secs = timeout.as_secs().max(1);
    }
    let overrides = args.container.to_config();

    run_with_harness(config, |harness| {
        let image = harness.get_test_image(&args.image);
        args.paths
            .iter()
            .map(|path| harness.test_file_exists(ctx, &image, path, overrides.as_ref()))
            .collect()
    })
}
