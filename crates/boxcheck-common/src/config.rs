//! Harness configuration model.
//!
//! [`HarnessConfig::from_env`] layers `BOXCHECK_*` environment variables
//! (and `TEST_IMAGE`) over the built-in defaults. [`HarnessConfig::default`]
//! returns the defaults without looking at the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{BoxcheckError, Result};

/// When the resolver pulls an image from its registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Pull on first resolution in a run, even if cached locally.
    Always,
    /// Pull only when the engine does not have the image.
    #[default]
    IfNotPresent,
    /// Never pull; fail if the image is absent.
    Never,
}

impl FromStr for PullPolicy {
    type Err = BoxcheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "if-not-present" | "ifnotpresent" | "missing" => Ok(Self::IfNotPresent),
            "never" => Ok(Self::Never),
            other => Err(BoxcheckError::config(format!("unknown pull policy: {other}"))),
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::IfNotPresent => write!(f, "if-not-present"),
            Self::Never => write!(f, "never"),
        }
    }
}

/// Root configuration for a harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Engine CLI to drive; auto-detected from `PATH` when unset.
    pub engine: Option<PathBuf>,
    /// Pull policy applied by the image resolver.
    pub pull_policy: PullPolicy,
    /// Registry prefixed to references that do not name one.
    pub default_registry: Option<String>,
    /// Replaces every image reference passed to `get_test_image`.
    pub image_override: Option<String>,
    /// Default overall deadline of an HTTP probe, in seconds.
    pub http_timeout_secs: u64,
    /// Delay between HTTP attempts, in milliseconds.
    pub http_retry_interval_ms: u64,
    /// Bound on one command or file check, in seconds.
    pub command_timeout_secs: u64,
    /// Bound on waiting for the container process to come up, in seconds.
    pub start_timeout_secs: u64,
    /// Grace period handed to `stop`, in seconds.
    pub stop_grace_secs: u64,
    /// Number of log lines attached to a failure diagnostic.
    pub log_tail_lines: usize,
    /// Host address ephemeral ports are bound to.
    pub bind_host: String,
    /// Entrypoint that keeps a container alive for filesystem checks.
    pub keep_alive_entrypoint: Vec<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            engine: None,
            pull_policy: PullPolicy::default(),
            default_registry: None,
            image_override: None,
            http_timeout_secs: constants::DEFAULT_HTTP_TIMEOUT_SECS,
            http_retry_interval_ms: constants::DEFAULT_HTTP_RETRY_INTERVAL_MS,
            command_timeout_secs: constants::DEFAULT_COMMAND_TIMEOUT_SECS,
            start_timeout_secs: constants::DEFAULT_START_TIMEOUT_SECS,
            stop_grace_secs: constants::DEFAULT_STOP_GRACE_SECS,
            log_tail_lines: constants::DEFAULT_LOG_TAIL_LINES,
            bind_host: constants::DEFAULT_BIND_HOST.to_string(),
            keep_alive_entrypoint: constants::KEEP_ALIVE_ENTRYPOINT
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl HarnessConfig {
    /// Loads the defaults overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the defaults overlaid with values returned by `lookup`.
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(engine) = get("BOXCHECK_ENGINE") {
            config.engine = Some(PathBuf::from(engine));
        }
        if let Some(policy) = get("BOXCHECK_PULL_POLICY") {
            config.pull_policy = policy.parse()?;
        }
        if let Some(registry) = get("BOXCHECK_REGISTRY") {
            config.default_registry = Some(registry.trim_end_matches('/').to_string());
        }
        if let Some(image) = get(constants::TEST_IMAGE_ENV) {
            tracing::debug!(image = %image, "{} overrides the image under test", constants::TEST_IMAGE_ENV);
            config.image_override = Some(image);
        }
        if let Some(v) = get("BOXCHECK_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = parse_number("BOXCHECK_HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("BOXCHECK_COMMAND_TIMEOUT_SECS") {
            config.command_timeout_secs = parse_number("BOXCHECK_COMMAND_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("BOXCHECK_START_TIMEOUT_SECS") {
            config.start_timeout_secs = parse_number("BOXCHECK_START_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("BOXCHECK_LOG_TAIL") {
            config.log_tail_lines = parse_number("BOXCHECK_LOG_TAIL", &v)?;
        }
        config.validate()?;
        tracing::debug!(
            pull_policy = %config.pull_policy,
            http_timeout_secs = config.http_timeout_secs,
            command_timeout_secs = config.command_timeout_secs,
            "loaded harness configuration"
        );
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout is zero or the bind host is empty.
    pub fn validate(&self) -> Result<()> {
        if self.http_timeout_secs == 0 {
            return Err(BoxcheckError::config("http timeout must be positive"));
        }
        if self.command_timeout_secs == 0 || self.start_timeout_secs == 0 {
            return Err(BoxcheckError::config("command and start timeouts must be positive"));
        }
        if self.bind_host.trim().is_empty() {
            return Err(BoxcheckError::config("bind host must not be empty"));
        }
        Ok(())
    }

    /// Default overall deadline of an HTTP probe.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Delay between HTTP attempts.
    #[must_use]
    pub const fn http_retry_interval(&self) -> Duration {
        Duration::from_millis(self.http_retry_interval_ms)
    }

    /// Bound on one command or file check.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Bound on waiting for the container process to come up.
    #[must_use]
    pub const fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    /// Grace period handed to `stop`.
    #[must_use]
    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BoxcheckError::config(format!("{key} must be a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex, PoisonError};

    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = HarnessConfig::default();
        cfg.validate().expect("defaults must validate");
        assert_eq!(cfg.pull_policy, PullPolicy::IfNotPresent);
        assert_eq!(cfg.http_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.keep_alive_entrypoint, vec!["sleep", "infinity"]);
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = HarnessConfig::from_lookup(lookup(&[
            ("BOXCHECK_PULL_POLICY", "always"),
            ("BOXCHECK_HTTP_TIMEOUT_SECS", "90"),
            ("BOXCHECK_REGISTRY", "quay.io/home-operations/"),
            ("TEST_IMAGE", "localhost/plex:ci"),
        ]))
        .expect("valid env");
        assert_eq!(cfg.pull_policy, PullPolicy::Always);
        assert_eq!(cfg.http_timeout_secs, 90);
        assert_eq!(cfg.default_registry.as_deref(), Some("quay.io/home-operations"));
        assert_eq!(cfg.image_override.as_deref(), Some("localhost/plex:ci"));
        assert_eq!(cfg.command_timeout_secs, 60);
    }

    #[test]
    fn test_image_override_is_logged() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();

        let cfg = tracing::subscriber::with_default(subscriber, || {
            HarnessConfig::from_lookup(lookup(&[("TEST_IMAGE", "ghcr.io/home-operations/plex:pr-42")]))
        })
        .expect("valid env");

        assert_eq!(cfg.image_override.as_deref(), Some("ghcr.io/home-operations/plex:pr-42"));
        let text = logs.text();
        assert!(text.contains("TEST_IMAGE overrides the image under test"), "{text}");
        assert!(text.contains("ghcr.io/home-operations/plex:pr-42"), "{text}");
    }

    #[test]
    fn empty_values_are_ignored() {
        let cfg = HarnessConfig::from_lookup(lookup(&[("TEST_IMAGE", "  ")])).expect("valid");
        assert!(cfg.image_override.is_none());
    }

    #[test]
    fn unparsable_number_is_config_error() {
        let err = HarnessConfig::from_lookup(lookup(&[("BOXCHECK_LOG_TAIL", "lots")]))
            .expect_err("should fail");
        assert!(matches!(err, BoxcheckError::Config { .. }));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = HarnessConfig::from_lookup(lookup(&[("BOXCHECK_HTTP_TIMEOUT_SECS", "0")]));
        assert!(err.is_err());
    }

    #[test]
    fn pull_policy_parses_aliases() {
        assert_eq!("Never".parse::<PullPolicy>().unwrap(), PullPolicy::Never);
        assert_eq!("missing".parse::<PullPolicy>().unwrap(), PullPolicy::IfNotPresent);
        assert!("sometimes".parse::<PullPolicy>().is_err());
    }

    #[test]
    fn config_deserializes_with_partial_fields() {
        let cfg: HarnessConfig =
            serde_json::from_str(r#"{"pull_policy":"never","log_tail_lines":10}"#).unwrap();
        assert_eq!(cfg.pull_policy, PullPolicy::Never);
        assert_eq!(cfg.log_tail_lines, 10);
        assert_eq!(cfg.bind_host, "127.0.0.1");
    }
}
