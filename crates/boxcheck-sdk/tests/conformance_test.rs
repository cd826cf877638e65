//! Conformance checks against real images.
//!
//! These need a container engine and network access to the registry, so
//! they are ignored by default. Run them with `cargo test -- --ignored`;
//! set `TEST_IMAGE` to point a single check at a freshly built tag.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use boxcheck_common::config::HarnessConfig;
use boxcheck_common::context::Context;
use boxcheck_sdk::{ContainerConfig, Harness, HttpTestConfig};

fn harness() -> Harness {
    Harness::connect(HarnessConfig::from_env().unwrap()).unwrap()
}

#[test]
#[ignore = "requires a container engine"]
fn plex() {
    let harness = harness();
    let image = harness.get_test_image("ghcr.io/home-operations/plex:rolling");
    harness
        .test_http_endpoint(
            &Context::background(),
            &image,
            &HttpTestConfig::new(32400).path("/web/index.html"),
            None,
        )
        .assert_passed();
}

#[test]
#[ignore = "requires a container engine"]
fn jackett() {
    let harness = harness();
    let image = harness.get_test_image("ghcr.io/home-operations/jackett:rolling");
    harness
        .test_http_endpoint(&Context::background(), &image, &HttpTestConfig::new(9117).status_code(400), None)
        .assert_passed();
}

#[test]
#[ignore = "requires a container engine"]
fn transmission() {
    let harness = harness();
    let image = harness.get_test_image("ghcr.io/home-operations/transmission:rolling");
    harness
        .test_http_endpoint(&Context::background(), &image, &HttpTestConfig::new(9091).status_code(403), None)
        .assert_passed();
}

#[test]
#[ignore = "requires a container engine"]
fn deluge() {
    let harness = harness();
    let image = harness.get_test_image("ghcr.io/home-operations/deluge:rolling");
    let overrides = ContainerConfig::new().env("DELUGE_BIN", "deluge-web");
    harness
        .test_http_endpoint(&Context::background(), &image, &HttpTestConfig::new(8122), Some(&overrides))
        .assert_passed();
}

#[test]
#[ignore = "requires a container engine"]
fn postgres_init() {
    let harness = harness();
    let image = harness.get_test_image("ghcr.io/home-operations/postgres-init:rolling");
    for tool in ["createdb", "createuser", "psql", "pg_isready"] {
        harness
            .test_file_exists(&Context::background(), &image, &format!("/usr/local/bin/{tool}"), None)
            .assert_passed();
    }
}

#[test]
#[ignore = "requires a container engine"]
fn busybox() {
    let harness = harness();
    let image = harness.get_test_image("ghcr.io/home-operations/busybox:rolling");
    harness
        .test_command_succeeds(&Context::background(), &image, None, ["/bin/busybox", "--list"])
        .assert_passed();
}
