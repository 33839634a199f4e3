//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use ltoc_guard::{GuardConfig, HttpServer, Shutdown};

/// Start a mock application that echoes `METHOD path [x-forwarded-for]`.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(|req: Request<Body>| async move {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        format!("{} {} {}", req.method(), req.uri().path(), forwarded)
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// A running guard plus the handle that stops it.
pub struct GuardHandle {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl GuardHandle {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the guard on an ephemeral port.
pub async fn start_guard(mut config: GuardConfig) -> GuardHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.listener.bind_address = addr.to_string();

    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server = HttpServer::new(config);
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    GuardHandle { addr, shutdown }
}

/// Config forwarding to `backend`.
pub fn config_for(backend: SocketAddr) -> GuardConfig {
    let mut config = GuardConfig::default();
    config.upstream.address = Some(format!("http://{backend}"));
    config
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
