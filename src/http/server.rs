//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with built-in routes and upstream fallback
//! - Wire up middleware (guard pipeline, tracing, timeout, request ID)
//! - Bind the server to a listener
//! - Run the window sweeper and apply reloaded configuration
//! - Forward admitted requests to the upstream application

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        header,
        uri::{Authority, PathAndQuery, Scheme},
        HeaderValue, Request, StatusCode, Uri,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GuardConfig;
use crate::http::middleware::{guard_middleware, GuardPolicies, GuardState, IssuedCsrfToken};
use crate::lifecycle::WindowSweeper;
use crate::observability::metrics;
use crate::security::{Clock, FixedWindowLimiter, RateLimitPolicy, SystemClock};

/// Where admitted requests are sent.
#[derive(Debug, Clone)]
pub struct Upstream {
    scheme: Scheme,
    authority: Authority,
}

impl Upstream {
    pub fn parse(address: &str) -> Option<Self> {
        let uri: Uri = address.parse().ok()?;
        let parts = uri.into_parts();
        Some(Self {
            scheme: parts.scheme.unwrap_or(Scheme::HTTP),
            authority: parts.authority?,
        })
    }

    fn from_config(config: &GuardConfig) -> Option<Arc<Self>> {
        let address = config.upstream.address.as_deref()?;
        let upstream = Self::parse(address);
        if upstream.is_none() {
            tracing::error!(address, "Unusable upstream address, forwarding disabled");
        }
        upstream.map(Arc::new)
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub guard: GuardState,
    pub upstream: Arc<ArcSwapOption<Upstream>>,
    pub client: Client<HttpConnector, Body>,
}

impl AppState {
    /// Swap in policies from a new configuration. Open rate windows survive.
    pub fn apply_config(&self, config: &GuardConfig) {
        self.guard
            .policies
            .store(Arc::new(GuardPolicies::from_config(config)));
        self.guard
            .limiter
            .reconfigure(RateLimitPolicy::from(&config.rate_limit));
        self.upstream.store(Upstream::from_config(config));
        tracing::info!("Guard configuration applied");
    }
}

/// HTTP server for the request guard.
pub struct HttpServer {
    router: Router,
    config: GuardConfig,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GuardConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a server whose rate limiter reads time from `clock`.
    pub fn with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = Arc::new(FixedWindowLimiter::new(
            RateLimitPolicy::from(&config.rate_limit),
            clock,
        ));

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = AppState {
            guard: GuardState::new(GuardPolicies::from_config(&config), limiter),
            upstream: Arc::new(ArcSwapOption::new(Upstream::from_config(&config))),
            client,
        };

        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, state: AppState) -> Router {
        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/csrf", get(csrf_token_handler))
            .fallback(forward_handler)
            .layer(middleware::from_fn_with_state(
                state.guard.clone(),
                guard_middleware,
            ))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GuardConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = WindowSweeper::new(
            self.state.guard.limiter.clone(),
            Duration::from_millis(self.config.rate_limit.sweep_interval_ms),
        );
        tokio::spawn(sweeper.run(shutdown.resubscribe()));

        let state = self.state.clone();
        let bind_address = self.config.listener.bind_address.clone();
        tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                if new_config.listener.bind_address != bind_address {
                    tracing::warn!(
                        current = %bind_address,
                        requested = %new_config.listener.bind_address,
                        "Listener address changes require a restart"
                    );
                }
                state.apply_config(&new_config);
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Shared state, for applying configuration outside `run`.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Clone of the fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Hand the caller its token; the cookie itself is HttpOnly.
async fn csrf_token_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    if let Some(IssuedCsrfToken(token)) = request.extensions().get::<IssuedCsrfToken>() {
        return Json(json!({ "token": token })).into_response();
    }

    let policies = state.guard.policies.load();
    match policies.csrf.token_from_cookies(request.headers()) {
        Some(token) => Json(json!({ "token": token })).into_response(),
        None => (StatusCode::NOT_FOUND, "No CSRF token").into_response(),
    }
}

/// Forward the request to the upstream application.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();

    let Some(upstream) = state.upstream.load_full() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No upstream configured").into_response();
    };

    let (mut parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(upstream.scheme.clone());
    uri_parts.authority = Some(upstream.authority.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        let forwarded = match parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {}", peer.ip()),
            None => peer.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert("x-forwarded-for", value);
        }
    }
    parts.headers.remove(header::CONNECTION);

    tracing::debug!(request_id = %request_id, uri = %parts.uri, "Forwarding request");

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_upstream(response.status().as_u16(), start);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            metrics::record_upstream(502, start);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
