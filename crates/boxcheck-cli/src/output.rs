//! Formatted output helpers for CLI commands.
//!
//! Renders per-probe verdict lines, failure diagnostics, and the closing
//! summary, plus the duration parsing used by `--timeout`.

use std::time::Duration;

use boxcheck_sdk::TestReport;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Reports of one CLI run.
#[derive(Debug)]
pub struct Summary {
    reports: Vec<TestReport>,
    elapsed: Duration,
}

impl Summary {
    /// Wraps finished reports.
    #[must_use]
    pub const fn new(reports: Vec<TestReport>, elapsed: Duration) -> Self {
        Self { reports, elapsed }
    }

    /// Number of passing reports.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    /// Whether every probe passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed() == self.reports.len()
    }

    /// Prints every report, then the totals.
    #[allow(clippy::print_stdout)]
    pub fn print(&self) {
        println!();
        for report in &self.reports {
            println!("{}", render_report(report));
        }
        let failed = self.reports.len() - self.passed();
        let color = if failed == 0 { GREEN } else { RED };
        println!();
        println!(
            "  {color}{BOLD}{} passed, {failed} failed{RESET} {DIM}in {}{RESET}",
            self.passed(),
            format_duration(self.elapsed)
        );
    }
}

/// Renders one report as a verdict line followed by its diagnostic.
#[must_use]
pub fn render_report(report: &TestReport) -> String {
    let elapsed = format_duration(report.elapsed);
    let mut out = match report.failure() {
        None => format!(
            "  {GREEN}PASS{RESET} {BOLD}{}{RESET} {} {DIM}({elapsed}){RESET}",
            report.image, report.probe
        ),
        Some(failure) => {
            let mut line = format!(
                "  {RED}FAIL{RESET} {BOLD}{}{RESET} {} {DIM}({elapsed}, {}){RESET}",
                report.image,
                report.probe,
                failure.category()
            );
            for diagnostic_line in failure.diagnostic.to_string().lines() {
                line.push_str("\n      ");
                line.push_str(diagnostic_line);
            }
            line
        }
    };
    if let Some(warning) = &report.teardown_warning {
        out.push_str(&format!("\n      {YELLOW}warning:{RESET} {warning}"));
    }
    out
}

/// Formats a duration as milliseconds below one second, seconds above.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Parses `500ms`, `30s`, `2m`, or a bare number of seconds.
///
/// # Errors
///
/// Returns a message naming the input if it cannot be parsed.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let raw = input.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {input:?}: expected a number with ms, s or m"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration {input:?}: too large")),
        other => Err(format!("invalid duration {input:?}: unknown unit {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use boxcheck_common::error::BoxcheckError;
    use boxcheck_sdk::TestFailure;

    use super::*;

    fn failed(error: BoxcheckError) -> TestReport {
        TestReport {
            image: "deluge:rolling".into(),
            probe: "GET :8122/ expecting 200".into(),
            verdict: Err(TestFailure::early(error)),
            elapsed: Duration::from_millis(1500),
            teardown_warning: None,
        }
    }

    fn start_failure() -> TestReport {
        failed(BoxcheckError::ContainerStart {
            image: "deluge:rolling".into(),
            message: "no such image".into(),
        })
    }

    #[test]
    fn parse_duration_accepts_units() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10h").is_err());
    }

    #[test]
    fn parse_duration_rejects_overflowing_minutes() {
        let err = parse_duration(&format!("{}m", u64::MAX)).unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert_eq!(parse_duration("1000m"), Ok(Duration::from_secs(60_000)));
    }

    #[test]
    fn format_duration_switches_units() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }

    #[test]
    fn failed_report_includes_category_and_diagnostic() {
        let text = render_report(&start_failure());
        assert!(text.contains("FAIL"));
        assert!(text.contains("container-start"));
        assert!(text.contains("\n      cannot start container from deluge:rolling: no such image"));
    }

    #[test]
    fn summary_counts_failures() {
        let summary = Summary::new(
            vec![start_failure(), failed(BoxcheckError::config("bad probe"))],
            Duration::from_secs(3),
        );
        assert_eq!(summary.passed(), 0);
        assert!(!summary.all_passed());
        assert!(Summary::new(Vec::new(), Duration::ZERO).all_passed());
    }
}
