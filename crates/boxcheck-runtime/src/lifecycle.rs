//! Container lifecycle: create, start, readiness wait, and guaranteed teardown.
//!
//! [`LifecycleManager::start`] returns a [`ContainerGuard`] that owns the
//! container. The guard removes it when released or dropped, so every exit
//! path of a test invocation (including unwinding panics) ends with the
//! container gone.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::constants::{MANAGED_LABEL, START_BACKOFF_INITIAL_MS, START_BACKOFF_MAX_MS};
use boxcheck_common::context::Context;
use boxcheck_common::error::{BoxcheckError, Result};
use boxcheck_common::types::{ContainerId, ContainerState, container_name};
use boxcheck_image::ResolvedImage;
use chrono::{DateTime, Utc};

use crate::backend::{ContainerEngine, ContainerStatus, CreateRequest, EngineState};
use crate::spec::StartSpec;

/// Network mode in which container ports are host ports.
const HOST_NETWORK: &str = "host";

/// Timing and binding settings for container lifecycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Bound on the wait for the process to come up.
    pub start_timeout: Duration,
    /// Grace period given to the image's own process on stop.
    pub stop_grace: Duration,
    /// Host address published ports bind to.
    pub bind_host: String,
}

impl From<&HarnessConfig> for LifecycleSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            start_timeout: config.start_timeout(),
            stop_grace: config.stop_grace(),
            bind_host: config.bind_host.clone(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&HarnessConfig::default())
    }
}

/// The single container owned by one test invocation.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Engine-assigned ID.
    pub id: ContainerId,
    /// Unique `boxcheck-<uuid>` name.
    pub name: String,
    /// Image reference the container runs.
    pub image: String,
    /// Container port → host port actually bound.
    pub ports: BTreeMap<u16, u16>,
    /// When the container was created.
    pub created_at: DateTime<Utc>,
    state: ContainerState,
    graceful_stop: bool,
}

impl ContainerHandle {
    fn new(id: ContainerId, name: String, image: String, graceful_stop: bool) -> Self {
        Self {
            id,
            name,
            image,
            ports: BTreeMap::new(),
            created_at: Utc::now(),
            state: ContainerState::Created,
            graceful_stop,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ContainerState {
        self.state
    }

    /// Host port bound to `container_port`, if published.
    #[must_use]
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// Returns whether the state changed.
    pub fn transition(&mut self, next: ContainerState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_transition_to(next) {
            tracing::warn!(id = self.id.short(), from = %self.state, to = %next, "illegal lifecycle transition ignored");
            return false;
        }
        tracing::debug!(id = self.id.short(), from = %self.state, to = %next, "lifecycle transition");
        self.state = next;
        true
    }

    /// Marks the container as failed unless it is already gone.
    pub fn mark_failed(&mut self) {
        let _ = self.transition(ContainerState::Failed);
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.id.short(), self.image)
    }
}

/// Owns a container and removes it when released or dropped.
pub struct ContainerGuard {
    handle: ContainerHandle,
    engine: Arc<dyn ContainerEngine>,
    grace: Duration,
    released: bool,
}

impl fmt::Debug for ContainerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerGuard")
            .field("handle", &self.handle)
            .field("engine", &self.engine.name())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl ContainerGuard {
    fn new(handle: ContainerHandle, engine: Arc<dyn ContainerEngine>, grace: Duration) -> Self {
        Self {
            handle,
            engine,
            grace,
            released: false,
        }
    }

    /// The owned handle.
    #[must_use]
    pub const fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// Mutable access to the owned handle.
    pub fn handle_mut(&mut self) -> &mut ContainerHandle {
        &mut self.handle
    }

    /// The engine the container lives in.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Stops and removes the container now.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::Teardown` if the engine fails to remove it.
    /// The guard does not retry on drop after an explicit release.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        teardown(self.engine.as_ref(), &mut self.handle, self.grace)
    }
}

impl Deref for ContainerGuard {
    type Target = ContainerHandle;

    fn deref(&self) -> &ContainerHandle {
        &self.handle
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.released || self.handle.state().is_removed() {
            return;
        }
        if let Err(e) = teardown(self.engine.as_ref(), &mut self.handle, self.grace) {
            tracing::warn!(container = %self.handle, error = %e, "container leaked on drop");
        }
    }
}

/// Creates, starts, and removes containers.
pub struct LifecycleManager {
    engine: Arc<dyn ContainerEngine>,
    settings: LifecycleSettings,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("engine", &self.engine.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl LifecycleManager {
    /// Creates a manager driving `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: LifecycleSettings) -> Self {
        Self { engine, settings }
    }

    /// The settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Creates and starts a container from `image`, publishing `ports`.
    ///
    /// Returns once the engine reports the process running or already
    /// exited. Any failure after creation tears the container down before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::ContainerStart` if the engine rejects
    /// creation or start, the process does not come up within the start
    /// timeout, a requested port is not bound, or `ctx` ends first.
    pub fn start(
        &self,
        ctx: &Context,
        image: &ResolvedImage,
        spec: &StartSpec,
        ports: &[u16],
    ) -> Result<ContainerGuard> {
        let image_ref = image.run_reference();
        let start_error = |message: String| BoxcheckError::ContainerStart {
            image: image_ref.clone(),
            message,
        };
        ctx.check().map_err(|i| start_error(format!("{i} before create")))?;

        let host_network = spec.network.as_deref() == Some(HOST_NETWORK);
        let mut publish: Vec<u16> = ports.to_vec();
        publish.sort_unstable();
        publish.dedup();

        let request = CreateRequest {
            name: container_name(),
            image: image_ref.clone(),
            labels: BTreeMap::from([(MANAGED_LABEL.to_string(), "true".to_string())]),
            env: spec.env.clone(),
            command: spec.command.clone(),
            entrypoint: spec.entrypoint.clone(),
            network: spec.network.clone(),
            publish: if host_network { Vec::new() } else { publish.clone() },
            bind_host: self.settings.bind_host.clone(),
        };

        let id = self
            .engine
            .create(&request)
            .map_err(|e| start_error(e.to_string()))?;
        let handle = ContainerHandle::new(id, request.name, image_ref.clone(), !spec.overrides_process());
        tracing::info!(id = handle.id.short(), name = %handle.name, image = %image_ref, "container created");

        let mut guard = ContainerGuard::new(handle, Arc::clone(&self.engine), self.settings.stop_grace);
        match self.bring_up(ctx, &mut guard.handle, &publish, host_network) {
            Ok(()) => Ok(guard),
            Err(message) => {
                guard.handle.mark_failed();
                tracing::info!(container = %guard.handle, %message, "container failed to start");
                drop(guard);
                Err(start_error(message))
            }
        }
    }

    /// Stops and removes the container behind `handle`.
    ///
    /// Safe to call more than once and after a partial start.
    ///
    /// # Errors
    ///
    /// Returns `BoxcheckError::Teardown` if the engine fails to remove it.
    pub fn stop_and_remove(&self, handle: &mut ContainerHandle) -> Result<()> {
        teardown(self.engine.as_ref(), handle, self.settings.stop_grace)
    }

    fn bring_up(
        &self,
        ctx: &Context,
        handle: &mut ContainerHandle,
        ports: &[u16],
        host_network: bool,
    ) -> std::result::Result<(), String> {
        let _ = handle.transition(ContainerState::Starting);
        self.engine.start(&handle.id).map_err(|e| e.to_string())?;

        let status = self.wait_until_up(ctx, &handle.id)?;
        if status.is_running() {
            for &port in ports {
                let host_port = if host_network {
                    port
                } else {
                    *status
                        .ports
                        .get(&port)
                        .ok_or_else(|| format!("container port {port} was not published"))?
                };
                let _ = handle.ports.insert(port, host_port);
            }
        }

        let _ = handle.transition(ContainerState::Ready);
        tracing::info!(
            id = handle.id.short(),
            state = %status.state,
            ports = ?handle.ports,
            "container up"
        );
        Ok(())
    }

    /// Polls with capped exponential backoff until the process is running
    /// or has exited.
    fn wait_until_up(&self, ctx: &Context, id: &ContainerId) -> std::result::Result<ContainerStatus, String> {
        let started = Instant::now();
        let ctx = ctx.with_timeout(self.settings.start_timeout);
        let mut delay = Duration::from_millis(START_BACKOFF_INITIAL_MS);
        let max_delay = Duration::from_millis(START_BACKOFF_MAX_MS);

        loop {
            let status = self.engine.inspect(id).map_err(|e| e.to_string())?;
            match status.state {
                EngineState::Running | EngineState::Exited => return Ok(status),
                EngineState::Dead => return Err(format!("container is {}", status.describe())),
                _ => {}
            }
            if let Err(interruption) = ctx.sleep(delay) {
                return Err(format!(
                    "{interruption} after {:?} waiting for the process (last state: {})",
                    started.elapsed(),
                    status.state
                ));
            }
            delay = (delay * 2).min(max_delay);
        }
    }
}

fn teardown(engine: &dyn ContainerEngine, handle: &mut ContainerHandle, grace: Duration) -> Result<()> {
    if handle.state().is_removed() {
        return Ok(());
    }
    if handle.graceful_stop && handle.state() == ContainerState::Ready {
        if let Err(e) = engine.stop(&handle.id, grace) {
            tracing::debug!(id = handle.id.short(), error = %e, "stop failed, forcing removal");
        }
    }
    engine
        .remove(&handle.id)
        .map_err(|e| BoxcheckError::Teardown {
            container: handle.name.clone(),
            message: e.to_string(),
        })?;
    let _ = handle.transition(ContainerState::Removed);
    tracing::info!(id = handle.id.short(), name = %handle.name, "container removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use boxcheck_common::types::ImageId;
    use boxcheck_image::ImageReference;

    use super::*;
    use crate::backend::scripted::{ImageScript, ScriptedEngine};
    use crate::spec::{self, ContainerConfig};

    fn resolved(reference: &str) -> ResolvedImage {
        ResolvedImage {
            reference: ImageReference::parse(reference).unwrap(),
            id: ImageId::new("sha256:1"),
            pulled: false,
        }
    }

    fn settings() -> LifecycleSettings {
        LifecycleSettings {
            start_timeout: Duration::from_millis(300),
            ..LifecycleSettings::default()
        }
    }

    fn manager(engine: &Arc<ScriptedEngine>) -> LifecycleManager {
        LifecycleManager::new(engine.clone(), settings())
    }

    #[test]
    fn start_publishes_ports_and_labels_container() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new()));
        let guard = manager(&engine)
            .start(&Context::background(), &resolved("app:1"), &StartSpec::default(), &[8122, 8122])
            .unwrap();

        assert_eq!(guard.state(), ContainerState::Ready);
        assert!(guard.host_port(8122).is_some());
        assert!(guard.name.starts_with("boxcheck-"));

        let request = engine.last_request().unwrap();
        assert_eq!(request.publish, vec![8122]);
        assert_eq!(request.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(request.bind_host, "127.0.0.1");
    }

    #[test]
    fn merged_config_reaches_the_engine() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new()));
        let spec = spec::merge(
            &StartSpec::default(),
            Some(&ContainerConfig::new().env("TZ", "UTC").network("none")),
        );
        let _guard = manager(&engine)
            .start(&Context::background(), &resolved("app:1"), &spec, &[])
            .unwrap();

        let request = engine.last_request().unwrap();
        assert_eq!(request.env.get("TZ").map(String::as_str), Some("UTC"));
        assert_eq!(request.network.as_deref(), Some("none"));
    }

    #[test]
    fn host_network_maps_ports_to_themselves() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new()));
        let spec = StartSpec {
            network: Some("host".into()),
            ..StartSpec::default()
        };
        let guard = manager(&engine)
            .start(&Context::background(), &resolved("app:1"), &spec, &[9117])
            .unwrap();
        assert_eq!(guard.host_port(9117), Some(9117));
        assert!(engine.last_request().unwrap().publish.is_empty());
    }

    #[test]
    fn drop_removes_container() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new()));
        {
            let _guard = manager(&engine)
                .start(&Context::background(), &resolved("app:1"), &StartSpec::default(), &[])
                .unwrap();
            assert_eq!(engine.live(), 1);
        }
        assert_eq!((engine.created(), engine.removed(), engine.live()), (1, 1, 0));
    }

    #[test]
    fn release_reports_teardown_failure_once() {
        let engine = Arc::new(
            ScriptedEngine::new()
                .with_image("app:1", ImageScript::new())
                .failing_remove("device or resource busy"),
        );
        let guard = manager(&engine)
            .start(&Context::background(), &resolved("app:1"), &StartSpec::default(), &[])
            .unwrap();
        let err = guard.release().unwrap_err();
        assert!(matches!(err, BoxcheckError::Teardown { .. }));
        assert!(err.to_string().contains("device or resource busy"));
    }

    #[test]
    fn rejected_start_is_torn_down() {
        let script = ImageScript::new().rejects_start("invalid mount config");
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", script));
        let err = manager(&engine)
            .start(&Context::background(), &resolved("app:1"), &StartSpec::default(), &[])
            .unwrap_err();

        assert!(matches!(err, BoxcheckError::ContainerStart { .. }));
        assert!(err.to_string().contains("invalid mount config"));
        assert_eq!((engine.created(), engine.removed()), (1, 1));
    }

    #[test]
    fn process_that_never_comes_up_times_out() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new().stuck_in_created()));
        let started = Instant::now();
        let err = manager(&engine)
            .start(&Context::background(), &resolved("app:1"), &StartSpec::default(), &[])
            .unwrap_err();

        assert!(matches!(err, BoxcheckError::ContainerStart { .. }));
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(engine.live(), 0);
    }

    #[test]
    fn unknown_image_fails_without_creating() {
        let engine = Arc::new(ScriptedEngine::new());
        let err = manager(&engine)
            .start(&Context::background(), &resolved("ghost:1"), &StartSpec::default(), &[])
            .unwrap_err();
        assert!(matches!(err, BoxcheckError::ContainerStart { .. }));
        assert_eq!(engine.created(), 0);
    }

    #[test]
    fn cancelled_context_creates_nothing() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new()));
        let ctx = Context::background();
        ctx.token().cancel();
        assert!(
            manager(&engine)
                .start(&ctx, &resolved("app:1"), &StartSpec::default(), &[])
                .is_err()
        );
        assert_eq!(engine.created(), 0);
    }

    #[test]
    fn exited_process_counts_as_up_without_ports() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new().exits_with(3)));
        let guard = manager(&engine)
            .start(&Context::background(), &resolved("app:1"), &StartSpec::default(), &[80])
            .unwrap();
        assert_eq!(guard.state(), ContainerState::Ready);
        assert_eq!(guard.host_port(80), None);
    }

    #[test]
    fn stop_and_remove_is_idempotent() {
        let engine = Arc::new(ScriptedEngine::new().with_image("app:1", ImageScript::new()));
        let lifecycle = manager(&engine);
        let guard = lifecycle
            .start(&Context::background(), &resolved("app:1"), &StartSpec::default(), &[])
            .unwrap();
        let mut handle = guard.handle().clone();
        lifecycle.stop_and_remove(&mut handle).unwrap();
        lifecycle.stop_and_remove(&mut handle).unwrap();
        assert!(handle.state().is_removed());
        drop(guard);
        assert_eq!(engine.removed(), 1);
    }
}
