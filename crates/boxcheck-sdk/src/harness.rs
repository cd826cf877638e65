//! The shared harness behind every one-line image test.
//!
//! One invocation runs strictly in order: resolve the image, merge the
//! caller's overrides, start one container, resolve one probe, gather a
//! diagnostic on failure, and remove the container. Invocations share the
//! engine connection and the image cache but nothing else, so they may run
//! concurrently from several threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::context::Context;
use boxcheck_common::error::{BoxcheckError, Result};
use boxcheck_image::{ImageResolver, ImageStore, ResolvedImage};
use boxcheck_probe::{HttpProbe, ProbeResult, ProbeSettings, ProbeSpec, diagnostic};
use boxcheck_runtime::backend::{self, ContainerEngine};
use boxcheck_runtime::{ContainerConfig, ContainerHandle, LifecycleManager, LifecycleSettings, StartSpec};

use crate::report::{TestFailure, TestReport};

type Verdict = std::result::Result<ProbeResult, TestFailure>;

/// HTTP expectation for [`Harness::test_http_endpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTestConfig {
    /// Container port to reach.
    pub port: u16,
    /// Request path, `/` by default.
    pub path: String,
    /// Expected status, 200 by default.
    pub status_code: u16,
    /// Overall deadline; the harness default when unset.
    pub timeout: Option<Duration>,
}

impl HttpTestConfig {
    /// Expects `GET /` on `port` to answer 200.
    #[must_use]
    pub fn new(port: u16) -> Self {
        let defaults = HttpProbe::new(port);
        Self {
            port,
            path: defaults.path,
            status_code: defaults.status,
            timeout: None,
        }
    }

    /// Sets the request path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the expected status.
    #[must_use]
    pub const fn status_code(mut self, status: u16) -> Self {
        self.status_code = status;
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn probe(&self) -> ProbeSpec {
        let mut probe = HttpProbe::new(self.port).path(self.path.clone()).status(self.status_code);
        if let Some(timeout) = self.timeout {
            probe = probe.timeout(timeout);
        }
        ProbeSpec::http(probe)
    }
}

/// Engine connection plus everything an invocation needs.
pub struct Harness {
    engine: Arc<dyn ContainerEngine>,
    config: HarnessConfig,
    resolver: ImageResolver,
    lifecycle: LifecycleManager,
    probe_settings: ProbeSettings,
    invocations: AtomicUsize,
    failures: AtomicUsize,
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("engine", &self.engine.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Harness {
    /// Locates the engine CLI, pings the daemon, and builds a harness.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no engine answers.
    pub fn connect(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let engine = backend::connect(&config)?;
        Ok(Self::with_engine(engine, config))
    }

    /// Builds a harness over an already connected engine.
    #[must_use]
    pub fn with_engine(engine: Arc<dyn ContainerEngine>, config: HarnessConfig) -> Self {
        let store: Arc<dyn ImageStore> = engine.clone();
        let resolver = ImageResolver::new(store, &config);
        let lifecycle = LifecycleManager::new(Arc::clone(&engine), LifecycleSettings::from(&config));
        let probe_settings = ProbeSettings::from(&config);
        Self {
            engine,
            config,
            resolver,
            lifecycle,
            probe_settings,
            invocations: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// The engine in use.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// The configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Probe timing derived from the configuration.
    #[must_use]
    pub const fn probe_settings(&self) -> &ProbeSettings {
        &self.probe_settings
    }

    /// Returns the image a test should run: the configured override
    /// (`TEST_IMAGE`) when set, `reference` otherwise.
    #[must_use]
    pub fn get_test_image(&self, reference: &str) -> String {
        self.config
            .image_override
            .clone()
            .unwrap_or_else(|| reference.to_string())
    }

    /// Resolves `reference` through the run cache, pulling if needed.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::ImageResolution` if it cannot be resolved.
    pub fn resolve_image(&self, reference: &str) -> Result<ResolvedImage> {
        self.resolver.resolve(reference)
    }

    /// Asserts that `GET <path>` on container port `port` answers the
    /// expected status before the deadline.
    pub fn test_http_endpoint(
        &self,
        ctx: &Context,
        image: &str,
        http: &HttpTestConfig,
        overrides: Option<&ContainerConfig>,
    ) -> TestReport {
        self.run_probe(ctx, image, &http.probe(), overrides)
    }

    /// Asserts that `path` exists inside the image.
    pub fn test_file_exists(
        &self,
        ctx: &Context,
        image: &str,
        path: &str,
        overrides: Option<&ContainerConfig>,
    ) -> TestReport {
        self.run_probe(ctx, image, &ProbeSpec::file_exists(path), overrides)
    }

    /// Asserts that `argv`, run in place of the entrypoint, exits 0.
    pub fn test_command_succeeds<I, S>(
        &self,
        ctx: &Context,
        image: &str,
        overrides: Option<&ContainerConfig>,
        argv: I,
    ) -> TestReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_probe(ctx, image, &ProbeSpec::command_succeeds(argv), overrides)
    }

    /// Asserts that `argv`, run in place of the entrypoint, exits nonzero.
    pub fn test_command_fails<I, S>(
        &self,
        ctx: &Context,
        image: &str,
        overrides: Option<&ContainerConfig>,
        argv: I,
    ) -> TestReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_probe(ctx, image, &ProbeSpec::command_fails(argv), overrides)
    }

    /// Runs one probe against a fresh container of `image`.
    ///
    /// The container is removed before this returns, whatever the outcome.
    /// A removal failure is attached as a warning and leaves the verdict
    /// untouched.
    pub fn run_probe(
        &self,
        ctx: &Context,
        image: &str,
        probe: &ProbeSpec,
        overrides: Option<&ContainerConfig>,
    ) -> TestReport {
        let span = tracing::info_span!("invocation", image, probe = %probe);
        let _entered = span.enter();
        let started = Instant::now();
        let _ = self.invocations.fetch_add(1, Ordering::Relaxed);

        let (verdict, teardown_warning) = self.invoke(ctx, image, probe, overrides);
        if let Err(failure) = &verdict {
            let _ = self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::info!(category = failure.category(), "invocation failed");
        }

        TestReport {
            image: image.to_string(),
            probe: probe.to_string(),
            verdict,
            elapsed: started.elapsed(),
            teardown_warning,
        }
    }

    fn invoke(
        &self,
        ctx: &Context,
        image: &str,
        probe: &ProbeSpec,
        overrides: Option<&ContainerConfig>,
    ) -> (Verdict, Option<BoxcheckError>) {
        if let Err(e) = probe.validate() {
            return (Err(TestFailure::early(e)), None);
        }
        let resolved = match self.resolver.resolve(image) {
            Ok(resolved) => resolved,
            Err(e) => return (Err(TestFailure::early(e)), None),
        };

        let spec = probe.launch_spec(overrides, &self.probe_settings);
        let guard = match self.lifecycle.start(ctx, &resolved, &spec, &probe.ports()) {
            Ok(guard) => guard,
            Err(e) => return (Err(TestFailure::early(e)), None),
        };

        let result = probe.resolve(ctx, self.engine.as_ref(), guard.handle(), &self.probe_settings);
        let verdict = match result.to_error() {
            None => Ok(result),
            Some(error) => {
                let diagnostic = diagnostic::report(
                    self.engine.as_ref(),
                    guard.handle(),
                    &result,
                    self.probe_settings.log_tail_lines,
                );
                Err(TestFailure {
                    error,
                    diagnostic,
                    result: Some(result),
                })
            }
        };

        let container = guard.handle().to_string();
        let teardown_warning = guard.release().err();
        if let Some(warning) = &teardown_warning {
            tracing::warn!(%container, error = %warning, "teardown failed after verdict");
        }
        (verdict, teardown_warning)
    }

    /// Starts a container of `image` and hands it to `f`, removing it
    /// afterwards even if `f` panics.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be resolved or the container
    /// does not start. A removal failure after `f` returns is logged.
    pub fn with_container<T, F>(&self, ctx: &Context, image: &str, spec: &StartSpec, ports: &[u16], f: F) -> Result<T>
    where
        F: FnOnce(&ContainerHandle, &dyn ContainerEngine) -> T,
    {
        let span = tracing::info_span!("invocation", image, probe = "scoped");
        let _entered = span.enter();
        let resolved = self.resolver.resolve(image)?;
        let guard = self.lifecycle.start(ctx, &resolved, spec, ports)?;
        let value = f(guard.handle(), self.engine.as_ref());
        let container = guard.handle().to_string();
        if let Err(e) = guard.release() {
            tracing::warn!(%container, error = %e, "teardown failed after scoped use");
        }
        Ok(value)
    }

    /// Ends the run and logs how it went.
    pub fn close(self) {
        tracing::info!(
            engine = self.engine.name(),
            invocations = self.invocations.load(Ordering::Relaxed),
            failures = self.failures.load(Ordering::Relaxed),
            "harness closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use boxcheck_runtime::backend::scripted::ScriptedEngine;

    use super::*;

    #[test]
    fn http_test_config_defaults_match_probe_defaults() {
        let config = HttpTestConfig::new(9117);
        assert_eq!(config.path, "/");
        assert_eq!(config.status_code, 200);
        assert_eq!(config.probe(), ProbeSpec::http(HttpProbe::new(9117)));
    }

    #[test]
    fn get_test_image_prefers_override() {
        let config = HarnessConfig {
            image_override: Some("registry.local/plex:pr-42".into()),
            ..HarnessConfig::default()
        };
        let harness = Harness::with_engine(Arc::new(ScriptedEngine::new()), config);
        assert_eq!(harness.get_test_image("plex:rolling"), "registry.local/plex:pr-42");

        let harness = Harness::with_engine(Arc::new(ScriptedEngine::new()), HarnessConfig::default());
        assert_eq!(harness.get_test_image("plex:rolling"), "plex:rolling");
    }
}
