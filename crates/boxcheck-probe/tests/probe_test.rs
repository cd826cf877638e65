//! Probe behaviour against scripted containers and a real HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use boxcheck_common::context::Context;
use boxcheck_common::types::ImageId;
use boxcheck_image::{ImageReference, ResolvedImage};
use boxcheck_probe::{FailureCause, HttpProbe, ProbeSettings, ProbeSpec, diagnostic};
use boxcheck_runtime::backend::ContainerEngine;
use boxcheck_runtime::backend::scripted::{ImageScript, ScriptedEngine};
use boxcheck_runtime::{ContainerConfig, ContainerGuard, LifecycleManager, LifecycleSettings};
use common::FakeService;
use common::fake_service::closed_port;

fn settings() -> ProbeSettings {
    ProbeSettings {
        http_retry_interval: Duration::from_millis(50),
        command_timeout: Duration::from_millis(500),
        ..ProbeSettings::default()
    }
}

fn launch(
    engine: &Arc<ScriptedEngine>,
    image: &str,
    probe: &ProbeSpec,
    overrides: Option<&ContainerConfig>,
) -> ContainerGuard {
    let lifecycle = LifecycleManager::new(engine.clone(), LifecycleSettings::default());
    let image = ResolvedImage {
        reference: ImageReference::parse(image).unwrap(),
        id: ImageId::new("sha256:1"),
        pulled: false,
    };
    lifecycle
        .start(
            &Context::background(),
            &image,
            &probe.launch_spec(overrides, &settings()),
            &probe.ports(),
        )
        .unwrap()
}

fn http_engine(image: &str, container_port: u16, host_port: u16) -> Arc<ScriptedEngine> {
    Arc::new(ScriptedEngine::new().with_image(image, ImageScript::new().publishes(container_port, host_port)))
}

#[test]
fn http_probe_passes_on_expected_status() {
    let service = FakeService::web_app();
    let engine = http_engine("plex:rolling", 32400, service.port());
    let probe = ProbeSpec::http(HttpProbe::new(32400).path("/web/index.html"));
    let guard = launch(&engine, "plex:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(result.passed(), "{:?}", result.verdict);
    assert_eq!(result.attempts, 1);
}

#[test]
fn http_probe_accepts_expected_non_200_status() {
    let service = FakeService::status(400);
    let engine = http_engine("jackett:rolling", 9117, service.port());
    let probe = ProbeSpec::http(HttpProbe::new(9117).status(400));
    let guard = launch(&engine, "jackett:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(result.passed());
}

#[test]
fn wrong_status_fails_without_retry() {
    let service = FakeService::status(200);
    let engine = http_engine("transmission:rolling", 9091, service.port());
    let probe = ProbeSpec::http(HttpProbe::new(9091).status(403));
    let guard = launch(&engine, "transmission:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert_eq!(result.attempts, 1);
    assert_eq!(
        result.cause(),
        Some(&FailureCause::Unexpected {
            expected: "status 403".into(),
            actual: "status 200".into(),
        })
    );
    assert!(!result.never_answered());
}

#[test]
fn http_probe_waits_for_a_booting_service() {
    let service = FakeService::late(Duration::from_millis(400), 200);
    let engine = http_engine("plex:rolling", 32400, service.port());
    let probe = ProbeSpec::http(HttpProbe::new(32400).timeout(Duration::from_secs(10)));
    let guard = launch(&engine, "plex:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(result.passed(), "{:?}", result.verdict);
    assert!(result.attempts > 1, "passed after {} attempts", result.attempts);
}

#[test]
fn sub_second_timeout_still_reaches_the_service() {
    let service = FakeService::status(200);
    let engine = http_engine("jackett:rolling", 9117, service.port());
    let probe = ProbeSpec::http(HttpProbe::new(9117).timeout(Duration::from_millis(900)));
    let guard = launch(&engine, "jackett:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(result.passed(), "{:?}", result.verdict);
    assert_eq!(result.attempts, 1);
}

#[test]
fn redirects_are_followed() {
    let service = FakeService::web_app();
    let engine = http_engine("plex:rolling", 32400, service.port());
    let probe = ProbeSpec::http(HttpProbe::new(32400).path("web"));
    let guard = launch(&engine, "plex:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(result.passed(), "{:?}", result.verdict);
}

#[test]
fn silent_endpoint_times_out_with_last_connection_error() {
    let engine = http_engine("quiet:1", 8080, closed_port());
    let probe = ProbeSpec::http(HttpProbe::new(8080).timeout(Duration::from_secs(1)));
    let guard = launch(&engine, "quiet:1", &probe, None);

    let started = Instant::now();
    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());

    assert!(result.never_answered());
    assert!(result.attempts > 1);
    assert!(started.elapsed() < Duration::from_secs(5));
    match result.cause() {
        Some(FailureCause::Timeout { last_error, cancelled }) => {
            assert!(!cancelled);
            assert!(!last_error.is_empty());
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(result.to_error().unwrap().category(), "probe-timeout");
}

#[test]
fn exited_container_fails_fast_while_polling() {
    let engine = http_engine("crashy:1", 8080, closed_port());
    let probe = ProbeSpec::http(HttpProbe::new(8080).timeout(Duration::from_secs(30)));
    let guard = launch(&engine, "crashy:1", &probe, None);
    engine.stop(&guard.id, Duration::ZERO).unwrap();

    let started = Instant::now();
    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        result.cause(),
        Some(&FailureCause::ContainerExited {
            status: "exited with code 137".into()
        })
    );
}

#[test]
fn cancellation_stops_polling_promptly() {
    let engine = http_engine("quiet:1", 8080, closed_port());
    let probe = ProbeSpec::http(HttpProbe::new(8080).timeout(Duration::from_secs(30)));
    let guard = launch(&engine, "quiet:1", &probe, None);

    let ctx = Context::background();
    let token = ctx.token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        token.cancel();
    });

    let started = Instant::now();
    let result = probe.resolve(&ctx, engine.as_ref(), guard.handle(), &settings());
    canceller.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        result.cause(),
        Some(FailureCause::Timeout { cancelled: true, .. })
    ));
}

#[test]
fn file_probe_checks_each_path_independently() {
    let script = ImageScript::new()
        .with_file("/usr/local/bin/createdb")
        .with_file("/usr/local/bin/psql");
    let engine = Arc::new(ScriptedEngine::new().with_image("postgres-init:rolling", script));

    let present = ProbeSpec::file_exists("/usr/local/bin/psql");
    let guard = launch(&engine, "postgres-init:rolling", &present, None);
    assert!(
        present
            .resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings())
            .passed()
    );
    drop(guard);

    let missing = ProbeSpec::file_exists("/usr/local/bin/pg_isready");
    let guard = launch(&engine, "postgres-init:rolling", &missing, None);
    let result = missing.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    let err = result.to_error().unwrap();
    assert_eq!(err.category(), "unexpected-result");
    assert!(err.to_string().contains("/usr/local/bin/pg_isready"));
    drop(guard);

    assert_eq!((engine.created(), engine.removed()), (2, 2));
}

#[test]
fn file_probe_on_exited_container_reports_exit() {
    let engine = Arc::new(ScriptedEngine::new().with_image("oneshot:1", ImageScript::new().exits_with(0)));
    let probe = ProbeSpec::file_exists("/etc/passwd");
    let overrides = ContainerConfig::new().command(["/init"]);
    let guard = launch(&engine, "oneshot:1", &probe, Some(&overrides));

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(matches!(result.cause(), Some(FailureCause::ContainerExited { .. })));
}

#[test]
fn command_probe_passes_on_exit_zero_regardless_of_output() {
    let script = ImageScript::new().with_command(&["/bin/busybox", "--list"], 0, "", "warning: odd\n");
    let engine = Arc::new(ScriptedEngine::new().with_image("busybox:rolling", script));
    let probe = ProbeSpec::command_succeeds(["/bin/busybox", "--list"]);
    let guard = launch(&engine, "busybox:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(result.passed(), "{:?}", result.verdict);
    assert_eq!(result.output.unwrap().stderr.trim(), "warning: odd");
}

#[test]
fn command_probe_reports_wrong_exit_code() {
    let engine = Arc::new(ScriptedEngine::new().with_image("busybox:rolling", ImageScript::new()));
    let probe = ProbeSpec::command_succeeds(["/bin/nonexistent"]);
    let guard = launch(&engine, "busybox:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert_eq!(
        result.cause(),
        Some(&FailureCause::Unexpected {
            expected: "exit code 0".into(),
            actual: "exit code 127".into(),
        })
    );
    assert!(result.output.unwrap().stderr.contains("/bin/nonexistent"));
}

#[test]
fn command_fails_probe_passes_on_nonzero_exit() {
    let script = ImageScript::new().with_command(&["false"], 1, "", "");
    let engine = Arc::new(ScriptedEngine::new().with_image("busybox:rolling", script));
    let probe = ProbeSpec::command_fails(["false"]);
    let guard = launch(&engine, "busybox:rolling", &probe, None);

    assert!(
        probe
            .resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings())
            .passed()
    );
}

#[test]
fn command_that_never_exits_times_out() {
    let engine = Arc::new(ScriptedEngine::new().with_image("busybox:rolling", ImageScript::new()));
    let probe = ProbeSpec::command_succeeds(["sleep", "3600"]);
    let guard = launch(&engine, "busybox:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    match result.cause() {
        Some(FailureCause::Timeout { last_error, .. }) => assert!(last_error.contains("running")),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn diagnostic_includes_exit_state_and_logs() {
    let script = ImageScript::new()
        .with_log("deluged starting")
        .requires_env("DELUGE_BIN", "deluge-web");
    let engine = Arc::new(ScriptedEngine::new().with_image("deluge:rolling", script));
    let probe = ProbeSpec::http(HttpProbe::new(8122).timeout(Duration::from_secs(2)));
    let guard = launch(&engine, "deluge:rolling", &probe, None);

    let result = probe.resolve(&Context::background(), engine.as_ref(), guard.handle(), &settings());
    assert!(result.never_answered());

    let report = diagnostic::report(engine.as_ref(), guard.handle(), &result, 50);
    let text = report.to_string();
    assert!(text.contains("exited with code 1"), "{text}");
    assert!(text.contains("deluged starting"), "{text}");
    assert!(text.contains("DELUGE_BIN"), "{text}");
}
