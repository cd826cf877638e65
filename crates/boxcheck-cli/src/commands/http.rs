//! `boxcheck http`: check that a container port answers HTTP.

use std::time::Duration;

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::context::Context;
use boxcheck_sdk::HttpTestConfig;
use clap::Args;

use super::{ContainerArgs, run_with_harness};
use crate::output::{Summary, parse_duration};

/// Arguments for the `http` command.
#[derive(Args, Debug)]
pub struct HttpArgs {
    /// Image reference to test.
    pub image: String,

    /// Container port to reach.
    #[arg(short, long)]
    pub port: u16,

    /// Request path.
    #[arg(long, default_value = "/")]
    pub path: String,

    /// Expected response status.
    #[arg(short, long, default_value_t = 200)]
    pub status: u16,

    /// Overall probe deadline (`500ms`, `30s`, `2m`).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Container overrides.
    #[command(flatten)]
    pub container: ContainerArgs,
}

/// Executes the `http` command.
///
/// # Errors
///
/// Returns an error if the engine cannot be reached.
pub fn execute(ctx: &Context, config: HarnessConfig, args: &HttpArgs) -> anyhow::Result<Summary> {
    let mut http = HttpTestConfig::new(args.port)
        .path(args.path.clone())
        .status_code(args.status);
    if let Some(timeout) = args.timeout {
        http = http.timeout(timeout);
    }
    let overrides = args.container.to_config();

    run_with_harness(config, |harness| {
        let image = harness.get_test_image(&args.image);
        vec![harness.test_http_endpoint(ctx, &image, &http, overrides.as_ref())]
    })
}
