//! `boxcheck suite`: run every probe of a YAML suite file.
//!
//! ```yaml
//! image: ghcr.io/home-operations/deluge:rolling
//! probes:
//!   - kind: http
//!     port: 8122
//!     container:
//!       env:
//!         DELUGE_BIN: deluge-web
//!   - kind: file-exists
//!     path: /usr/bin/deluged
//! ```
//!
//! Each probe is an independent invocation with its own container.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use boxcheck_common::config::HarnessConfig;
use boxcheck_common::context::Context;
use boxcheck_sdk::{ContainerConfig, Harness, ProbeSpec, TestReport};
use clap::Args;
use serde::Deserialize;

use super::run_with_harness;
use crate::output::{Summary, parse_duration};

/// Arguments for the `suite` command.
#[derive(Args, Debug)]
pub struct SuiteArgs {
    /// Path to the suite file.
    pub file: PathBuf,

    /// Probes run concurrently.
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Deadline of each invocation (`500ms`, `30s`, `2m`).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

/// A parsed suite file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Suite {
    /// Image every probe runs against.
    pub image: String,
    /// Probes, in declaration order.
    pub probes: Vec<SuiteEntry>,
}

/// One probe of a suite with its own container overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuiteEntry {
    /// The probe.
    #[serde(flatten)]
    pub probe: ProbeSpec,
    /// Overrides for this probe's container.
    #[serde(default)]
    pub container: Option<ContainerConfig>,
}

impl Suite {
    /// Reads and validates a suite file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, lists no
    /// probes, or contains a malformed probe.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        let suite: Self = serde_yaml::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))?;
        if suite.probes.is_empty() {
            anyhow::bail!("{} lists no probes", path.display());
        }
        for (i, entry) in suite.probes.iter().enumerate() {
            entry
                .probe
                .validate()
                .with_context(|| format!("probe {} of {}", i + 1, path.display()))?;
        }
        Ok(suite)
    }
}

/// Runs every probe of `suite` on at most `jobs` threads and returns the
/// reports in declaration order.
pub fn run(harness: &Harness, ctx: &Context, suite: &Suite, jobs: usize, deadline: Option<Duration>) -> Vec<TestReport> {
    let image = harness.get_test_image(&suite.image);
    let total = suite.probes.len();
    let next = AtomicUsize::new(0);
    let slots: Mutex<Vec<Option<TestReport>>> = Mutex::new((0..total).map(|_| None).collect());
    tracing::info!(image = %image, probes = total, jobs, "running suite");

    thread::scope(|scope| {
        for _ in 0..jobs.clamp(1, total.max(1)) {
            let _ = scope.spawn(|| {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(entry) = suite.probes.get(index) else {
                        break;
                    };
                    let ctx = deadline.map_or_else(|| ctx.clone(), |d| ctx.with_timeout(d));
                    let report = harness.run_probe(&ctx, &image, &entry.probe, entry.container.as_ref());
                    slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(report);
                }
            });
        }
    });

    slots
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .flatten()
        .collect()
}

/// Executes the `suite` command.
///
/// # Errors
///
/// Returns an error if the suite cannot be loaded or the engine cannot be
/// reached.
pub fn execute(ctx: &Context, config: HarnessConfig, args: &SuiteArgs) -> anyhow::Result<Summary> {
    let suite = Suite::load(&args.file)?;
    run_with_harness(config, |harness| run(harness, ctx, &suite, args.jobs, args.timeout))
}
