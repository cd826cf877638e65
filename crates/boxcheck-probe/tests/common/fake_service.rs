//! Stand-in for the HTTP service inside a container image.
//!
//! Spins up a minimal `axum` server on a random loopback port in its own
//! thread with a current-thread runtime, so blocking probe code can call it
//! from the test thread. The scripted engine publishes a container port to
//! this server's port.

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use tokio::sync::oneshot;

/// Handle to a running fake service. Shuts the server down on drop.
pub struct FakeService {
    port: u16,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeService {
    /// Serves `router` until the handle is dropped.
    pub fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel::<()>();
        let _ = thread::spawn(move || serve(listener, router, rx));

        Self {
            port,
            shutdown: Some(tx),
        }
    }

    /// Refuses connections for `delay`, then answers every path with
    /// `status`, like a service that is still booting.
    pub fn late(delay: Duration, status: u16) -> Self {
        let port = closed_port();
        let router = status_router(status);
        let (tx, rx) = oneshot::channel::<()>();
        let _ = thread::spawn(move || {
            thread::sleep(delay);
            let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
            serve(listener, router, rx);
        });

        Self {
            port,
            shutdown: Some(tx),
        }
    }

    /// Answers every path with `status`.
    pub fn status(status: u16) -> Self {
        Self::start(status_router(status))
    }

    /// Serves `/web/index.html` with 200, redirects `/web` there, and
    /// answers everything else with 404.
    pub fn web_app() -> Self {
        Self::start(
            Router::new()
                .route("/web/index.html", get(|| async { "<html>plex</html>" }))
                .route("/web", get(|| async { Redirect::permanent("/web/index.html") }))
                .fallback(|| async { (StatusCode::NOT_FOUND, "not found") }),
        )
    }

    /// Loopback port the server listens on.
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn status_router(status: u16) -> Router {
    let code = StatusCode::from_u16(status).unwrap();
    Router::new().fallback(move || async move { (code, "fake service") })
}

fn serve(listener: TcpListener, router: Router, shutdown: oneshot::Receiver<()>) {
    listener.set_nonblocking(true).unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown.await;
            })
            .await
            .unwrap();
    });
}

/// A loopback port nothing listens on.
pub fn closed_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
