//! Outcome of one test invocation.

use std::fmt;
use std::time::Duration;

use boxcheck_common::error::BoxcheckError;
use boxcheck_probe::{Diagnostic, ProbeResult};

/// Why an invocation failed, with everything gathered to explain it.
#[derive(Debug)]
pub struct TestFailure {
    /// The error that decided the verdict.
    pub error: BoxcheckError,
    /// Consolidated diagnostic rendered into the test failure.
    pub diagnostic: Diagnostic,
    /// The probe result, when the probe ran at all.
    pub result: Option<ProbeResult>,
}

impl TestFailure {
    /// A failure raised before any probe ran.
    #[must_use]
    pub fn early(error: BoxcheckError) -> Self {
        let diagnostic = Diagnostic::bare(error.to_string());
        Self {
            error,
            diagnostic,
            result: None,
        }
    }

    /// Short taxonomy name of the deciding error.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        self.error.category()
    }
}

/// Verdict of one invocation plus anything that went wrong afterwards.
#[derive(Debug)]
pub struct TestReport {
    /// Image reference as requested.
    pub image: String,
    /// Probe description.
    pub probe: String,
    /// Passing probe result, or the failure.
    pub verdict: Result<ProbeResult, TestFailure>,
    /// Wall time of the whole invocation, teardown included.
    pub elapsed: Duration,
    /// Set when the container could not be removed. Never changes the verdict.
    pub teardown_warning: Option<BoxcheckError>,
}

impl TestReport {
    /// Returns whether the probe passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.verdict.is_ok()
    }

    /// The failure, if the invocation failed.
    #[must_use]
    pub fn failure(&self) -> Option<&TestFailure> {
        self.verdict.as_ref().err()
    }

    /// The probe result, whether it passed or failed.
    #[must_use]
    pub fn probe_result(&self) -> Option<&ProbeResult> {
        match &self.verdict {
            Ok(result) => Some(result),
            Err(failure) => failure.result.as_ref(),
        }
    }

    /// Consumes the report into the deciding error, if any.
    ///
    /// # Errors
    ///
    /// Returns the error that failed the invocation.
    pub fn into_result(self) -> Result<ProbeResult, BoxcheckError> {
        self.verdict.map_err(|failure| failure.error)
    }

    /// Panics with the full diagnostic unless the probe passed.
    ///
    /// Meant to be the last line of a `#[test]` function.
    #[track_caller]
    #[allow(clippy::panic)]
    pub fn assert_passed(&self) {
        if let Err(failure) = &self.verdict {
            panic!("{} against {} failed: {}", self.probe, self.image, failure.diagnostic);
        }
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match &self.verdict {
            Ok(_) => "PASS".to_string(),
            Err(failure) => format!("FAIL [{}]", failure.category()),
        };
        write!(
            f,
            "{verdict} {} :: {} ({} ms)",
            self.image,
            self.probe,
            self.elapsed.as_millis()
        )?;
        if let Some(warning) = &self.teardown_warning {
            write!(f, "\n  warning: {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing() -> TestReport {
        TestReport {
            image: "ghost:1".into(),
            probe: "GET :80/ expecting 200".into(),
            verdict: Err(TestFailure::early(BoxcheckError::config("bad probe"))),
            elapsed: Duration::from_millis(3),
            teardown_warning: None,
        }
    }

    #[test]
    fn display_shows_verdict_and_category() {
        let report = failing();
        assert_eq!(
            report.to_string(),
            "FAIL [config] ghost:1 :: GET :80/ expecting 200 (3 ms)"
        );
        assert!(!report.passed());
        assert!(report.probe_result().is_none());
    }

    #[test]
    #[should_panic(expected = "invalid configuration: bad probe")]
    fn assert_passed_panics_with_diagnostic() {
        failing().assert_passed();
    }

    #[test]
    fn teardown_warning_is_rendered_after_verdict() {
        let mut report = failing();
        report.teardown_warning = Some(BoxcheckError::Teardown {
            container: "boxcheck-1".into(),
            message: "device busy".into(),
        });
        let text = report.to_string();
        assert!(text.starts_with("FAIL [config]"));
        assert!(text.ends_with("warning: cannot remove container boxcheck-1: device busy"));
    }
}
