//! Harness-wide constants and defaults.

/// Binary name for the CLI.
pub const BIN_NAME: &str = "boxcheck";

/// Label attached to every container the harness creates.
pub const MANAGED_LABEL: &str = "boxcheck.managed";

/// Prefix of generated container names.
pub const CONTAINER_NAME_PREFIX: &str = "boxcheck";

/// Environment variable that substitutes the image under test.
pub const TEST_IMAGE_ENV: &str = "TEST_IMAGE";

/// Tag applied to references that do not name one.
pub const DEFAULT_TAG: &str = "latest";

/// Default request path for HTTP probes.
pub const DEFAULT_HTTP_PATH: &str = "/";

/// Default expected status code for HTTP probes.
pub const DEFAULT_HTTP_STATUS: u16 = 200;

/// Default overall deadline for an HTTP probe, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Default delay between HTTP attempts, in milliseconds.
pub const DEFAULT_HTTP_RETRY_INTERVAL_MS: u64 = 500;

/// Upper bound on a single HTTP attempt, in seconds.
pub const HTTP_ATTEMPT_TIMEOUT_SECS: u64 = 5;

/// Maximum redirects followed by the HTTP probe.
pub const HTTP_MAX_REDIRECTS: usize = 10;

/// Minimum spacing of container liveness checks while an HTTP probe retries.
pub const LIVENESS_CHECK_INTERVAL_MS: u64 = 1000;

/// Default bound on a single command or file check, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Default bound on waiting for the container process to come up, in seconds.
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 30;

/// Default grace period given to `stop` before the engine kills, in seconds.
pub const DEFAULT_STOP_GRACE_SECS: u64 = 5;

/// Default number of log lines attached to a diagnostic.
pub const DEFAULT_LOG_TAIL_LINES: usize = 50;

/// Host address ephemeral ports are bound to.
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// First delay of the start backoff, in milliseconds.
pub const START_BACKOFF_INITIAL_MS: u64 = 25;

/// Cap of the start backoff, in milliseconds.
pub const START_BACKOFF_MAX_MS: u64 = 400;

/// Entrypoint used to keep a container alive for filesystem checks.
pub const KEEP_ALIVE_ENTRYPOINT: [&str; 2] = ["sleep", "infinity"];

/// Container engine CLIs probed, in order, when none is configured.
pub const ENGINE_CANDIDATES: [&str; 2] = ["docker", "podman"];
