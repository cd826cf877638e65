//! HTTP readiness probe.
//!
//! Connection-level failures (refused, reset, attempt timeout) are retried
//! every retry interval until the deadline. Any received status resolves
//! the probe at once: a match passes, anything else fails without retry.
//! While retrying, the container is inspected at most once per liveness
//! interval so a crashed service fails fast instead of waiting out the
//! deadline.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use boxcheck_common::constants::{HTTP_ATTEMPT_TIMEOUT_SECS, HTTP_MAX_REDIRECTS, LIVENESS_CHECK_INTERVAL_MS};
use boxcheck_common::context::{Context, Interruption};
use boxcheck_common::error::EngineErrorKind;
use boxcheck_runtime::backend::ContainerEngine;
use boxcheck_runtime::lifecycle::ContainerHandle;
use reqwest::blocking::Client;
use reqwest::redirect::Policy;

use crate::probe::{HttpProbe, ProbeSettings};
use crate::result::{FailureCause, ProbeResult, Tally, Verdict};

/// Outcome of a single GET.
#[derive(Debug)]
enum Attempt {
    /// A response arrived; the probe is resolved.
    Resolved(Verdict),
    /// No response; keep polling.
    Polling(String),
}

pub(crate) fn resolve(
    ctx: &Context,
    engine: &dyn ContainerEngine,
    handle: &ContainerHandle,
    probe: &HttpProbe,
    settings: &ProbeSettings,
) -> ProbeResult {
    let path = probe.normalized_path();
    let mut tally = Tally::new(format!("GET :{}{path}", probe.port));

    let Some(host_port) = handle.host_port(probe.port) else {
        return unpublished(engine, handle, probe.port, tally);
    };
    let url = format!("http://{}:{host_port}{path}", settings.connect_host);

    let client = match Client::builder()
        .redirect(Policy::limited(HTTP_MAX_REDIRECTS))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            return tally.fail(FailureCause::Engine {
                operation: "http",
                kind: EngineErrorKind::Rejected,
                message: format!("cannot build HTTP client: {}", chain(&e)),
            });
        }
    };

    let timeout = probe.deadline().unwrap_or(settings.http_timeout);
    let ctx = ctx.with_timeout(timeout);
    let mut last_liveness: Option<Instant> = None;
    tracing::debug!(%url, expected = probe.status, ?timeout, "polling HTTP endpoint");

    loop {
        if let Err(interruption) = ctx.check() {
            return timed_out(tally, interruption);
        }

        let attempt = tally.attempt();
        let attempt_timeout = ctx.bound(Duration::from_secs(HTTP_ATTEMPT_TIMEOUT_SECS));
        match get(&client, &url, attempt_timeout, probe.status) {
            Attempt::Resolved(verdict) => {
                if let Verdict::Fail(FailureCause::Unexpected { actual, .. }) = &verdict {
                    tally.observe(actual.clone());
                } else {
                    tally.observe(format!("status {}", probe.status));
                }
                return tally.finish(verdict);
            }
            Attempt::Polling(error) => {
                tracing::debug!(attempt, %error, "endpoint not answering yet");
                tally.observe(error);
            }
        }

        let due = last_liveness.is_none_or(|at| at.elapsed() >= Duration::from_millis(LIVENESS_CHECK_INTERVAL_MS));
        if due {
            last_liveness = Some(Instant::now());
            match engine.inspect(&handle.id) {
                Ok(status) if status.has_exited() => {
                    return tally.fail(FailureCause::ContainerExited {
                        status: status.describe(),
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "liveness check failed"),
            }
        }

        if let Err(interruption) = ctx.sleep(settings.http_retry_interval) {
            return timed_out(tally, interruption);
        }
    }
}

fn get(client: &Client, url: &str, timeout: Duration, expected: u16) -> Attempt {
    if timeout.is_zero() {
        return Attempt::Polling("deadline reached before the request".into());
    }
    match client.get(url).timeout(timeout).send() {
        Ok(response) => {
            let status = response.status().as_u16();
            if status == expected {
                Attempt::Resolved(Verdict::Pass)
            } else {
                Attempt::Resolved(Verdict::Fail(FailureCause::Unexpected {
                    expected: format!("status {expected}"),
                    actual: format!("status {status}"),
                }))
            }
        }
        Err(e) if e.is_redirect() => Attempt::Resolved(Verdict::Fail(FailureCause::Unexpected {
            expected: format!("status {expected}"),
            actual: chain(&e),
        })),
        Err(e) => Attempt::Polling(chain(&e)),
    }
}

fn unpublished(engine: &dyn ContainerEngine, handle: &ContainerHandle, port: u16, tally: Tally) -> ProbeResult {
    match engine.inspect(&handle.id) {
        Ok(status) if status.has_exited() => tally.fail(FailureCause::ContainerExited {
            status: status.describe(),
        }),
        _ => tally.fail(FailureCause::Unexpected {
            expected: format!("container port {port} published"),
            actual: "no host port bound".into(),
        }),
    }
}

fn timed_out(tally: Tally, interruption: Interruption) -> ProbeResult {
    let last_error = tally
        .last_observation()
        .unwrap_or("no attempt completed")
        .to_string();
    tracing::debug!(probe = tally.probe(), attempts = tally.attempts(), %interruption, "HTTP probe gave up");
    tally.fail(FailureCause::Timeout {
        last_error,
        cancelled: interruption == Interruption::Cancelled,
    })
}

/// Flattens an error and its sources into one line.
fn chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn refused_connection_keeps_polling() {
        // Bind then drop to get a port nothing listens on.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let client = Client::new();
        let attempt = get(&client, &format!("http://127.0.0.1:{port}/"), Duration::from_secs(2), 200);
        assert!(matches!(attempt, Attempt::Polling(_)));
    }

    #[test]
    fn zero_budget_does_not_send() {
        let client = Client::new();
        let attempt = get(&client, "http://127.0.0.1:9/", Duration::ZERO, 200);
        assert!(matches!(attempt, Attempt::Polling(msg) if msg.contains("deadline")));
    }

    #[test]
    fn chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let wrapped = boxcheck_common::error::BoxcheckError::Io {
            path: "127.0.0.1:1".into(),
            source: io,
        };
        let text = chain(&wrapped);
        assert!(text.contains("connection refused"));
    }
}
