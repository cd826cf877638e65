//! CLI command definitions and dispatch.

pub mod cmd;
pub mod file;
pub mod http;
pub mod suite;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context as _;
use boxcheck_common::config::{HarnessConfig, PullPolicy};
use boxcheck_common::context::{CancelToken, Context};
use boxcheck_sdk::{ContainerConfig, Harness, TestReport};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::output::Summary;

/// boxcheck: prove that a built container image boots and exposes its contract.
#[derive(Parser, Debug)]
#[command(name = boxcheck_common::constants::BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand. They override `BOXCHECK_*` variables.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Engine CLI to drive (`docker`, `podman`, or a path).
    #[arg(long, global = true)]
    pub engine: Option<PathBuf>,

    /// When to pull images: always, if-not-present, never.
    #[arg(long, global = true)]
    pub pull_policy: Option<PullPolicy>,

    /// Registry prefixed to references that do not name one.
    #[arg(long, global = true)]
    pub registry: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl GlobalArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(engine) = &self.engine {
            config.engine = Some(engine.clone());
        }
        if let Some(policy) = self.pull_policy {
            config.pull_policy = policy;
        }
        if let Some(registry) = &self.registry {
            config.default_registry = Some(registry.trim_end_matches('/').to_string());
        }
    }
}

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that a container port answers HTTP with the expected status.
    Http(http::HttpArgs),
    /// Check that a path exists inside the image.
    File(file::FileArgs),
    /// Check the exit code of a command run in place of the entrypoint.
    Cmd(cmd::CmdArgs),
    /// Run every probe of a YAML suite file.
    Suite(suite::SuiteArgs),
}

/// Container overrides accepted by the single-probe subcommands.
#[derive(Args, Debug, Default, Clone)]
pub struct ContainerArgs {
    /// Environment variable override, repeatable.
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Replacement entrypoint, split on whitespace.
    #[arg(long, value_name = "PROGRAM")]
    pub entrypoint: Option<String>,

    /// Network mode (`bridge`, `host`, or a network name).
    #[arg(long)]
    pub network: Option<String>,
}

impl ContainerArgs {
    /// Builds the override set, or `None` when nothing was given.
    #[must_use]
    pub fn to_config(&self) -> Option<ContainerConfig> {
        if self.env.is_empty() && self.entrypoint.is_none() && self.network.is_none() {
            return None;
        }
        let mut config = ContainerConfig::new();
        for (key, value) in &self.env {
            config = config.env(key.clone(), value.clone());
        }
        if let Some(entrypoint) = &self.entrypoint {
            config = config.entrypoint(entrypoint.split_whitespace());
        }
        if let Some(network) = &self.network {
            config = config.network(network.clone());
        }
        Some(config)
    }
}

fn parse_env(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {input:?}")),
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if configuration is invalid, the engine cannot be
/// reached, or a suite file cannot be loaded. Probe failures are not
/// errors; they are reported in the returned summary.
pub fn execute(cli: Cli) -> anyhow::Result<Summary> {
    let mut config = HarnessConfig::from_env().context("invalid BOXCHECK_* environment")?;
    cli.global.apply(&mut config);
    let ctx = interruptible()?;

    match cli.command {
        Command::Http(args) => http::execute(&ctx, config, &args),
        Command::File(args) => file::execute(&ctx, config, &args),
        Command::Cmd(args) => cmd::execute(&ctx, config, &args),
        Command::Suite(args) => suite::execute(&ctx, config, &args),
    }
}

/// A context cancelled by Ctrl-C, so running probes stop and containers
/// are still removed.
fn interruptible() -> anyhow::Result<Context> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupted, cancelling running probes");
        handler_token.cancel();
    })
    .context("failed to set Ctrl+C handler")?;
    Ok(Context::with_token(token))
}

/// Connects, runs `f` against the harness, closes, and prints the summary.
fn run_with_harness<F>(config: HarnessConfig, f: F) -> anyhow::Result<Summary>
where
    F: FnOnce(&Harness) -> Vec<TestReport>,
{
    let started = Instant::now();
    let harness = Harness::connect(config).context("cannot connect to a container engine")?;
    let reports = f(&harness);
    harness.close();
    let summary = Summary::new(reports, started.elapsed());
    summary.print();
    Ok(summary)
}
