//! # boxcheck
//!
//! Container conformance harness CLI.
//! Starts an image, proves one fact about it (or a suite of facts), and
//! removes every container it created.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, LogFormat};
use crate::output::Summary;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.log_format);
    ExitCode::from(exit_status(commands::execute(cli)))
}

/// 0 when every probe passed, 1 when any failed, 2 when the run itself
/// could not complete.
#[allow(clippy::print_stderr)]
fn exit_status(outcome: anyhow::Result<Summary>) -> u8 {
    match outcome {
        Ok(summary) if summary.all_passed() => 0,
        Ok(_) => 1,
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use boxcheck_common::error::BoxcheckError;
    use boxcheck_sdk::{TestFailure, TestReport};

    use super::*;

    #[test]
    fn exit_codes_separate_failures_from_errors() {
        let failed = TestReport {
            image: "jackett:rolling".into(),
            probe: "GET :9117/ expecting 400".into(),
            verdict: Err(TestFailure::early(BoxcheckError::config("bad probe"))),
            elapsed: Duration::from_millis(10),
            teardown_warning: None,
        };

        assert_eq!(exit_status(Ok(Summary::new(Vec::new(), Duration::ZERO))), 0);
        assert_eq!(exit_status(Ok(Summary::new(vec![failed], Duration::ZERO))), 1);
        assert_eq!(exit_status(Err(anyhow::anyhow!("cannot connect"))), 2);
    }
}
