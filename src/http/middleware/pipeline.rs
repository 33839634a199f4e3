//! Request guard pipeline.
//!
//! ```text
//! bypass? ──yes──▶ app
//!    │no
//!    ▼
//! CSRF ──reject──▶ 403
//!    │
//!    ▼
//! rate limit (API paths) ──reject──▶ 429
//!    │
//!    ▼
//! app ─▶ + csrf cookie, quota, security and CORS headers
//! ```
//!
//! Each stage either ends the request or passes it on. Nothing is retried.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::GuardConfig;
use crate::observability::metrics;
use crate::security::path_under;
use crate::security::rate_limit::client_identifier;
use crate::security::rejection::insert_quota_headers;
use crate::security::{
    CorsPolicy, CsrfGuard, CsrfOutcome, FixedWindowLimiter, RateDecision, Rejection,
    SecurityHeaders,
};

/// Token planted on this request, visible to downstream handlers.
#[derive(Debug, Clone)]
pub struct IssuedCsrfToken(pub String);

/// Everything the pipeline derives from configuration.
#[derive(Debug, Clone)]
pub struct GuardPolicies {
    pub csrf: CsrfGuard,
    pub security: SecurityHeaders,
    pub cors: CorsPolicy,
    pub api_prefix: String,
    pub bypass_prefixes: Vec<String>,
}

impl GuardPolicies {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            csrf: CsrfGuard::new(&config.csrf, config.security.production),
            security: SecurityHeaders::new(&config.security),
            cors: CorsPolicy::new(&config.cors),
            api_prefix: config.rate_limit.api_prefix.clone(),
            bypass_prefixes: config.security.bypass_prefixes.clone(),
        }
    }

    /// Static assets and internal build paths skip the guard entirely.
    pub fn bypasses(&self, path: &str) -> bool {
        path.contains('.') || self.bypass_prefixes.iter().any(|p| path_under(path, p))
    }

    pub fn is_api(&self, path: &str) -> bool {
        path_under(path, &self.api_prefix)
    }
}

/// Shared state for [`guard_middleware`].
#[derive(Clone)]
pub struct GuardState {
    pub policies: Arc<ArcSwap<GuardPolicies>>,
    pub limiter: Arc<FixedWindowLimiter>,
}

impl GuardState {
    pub fn new(policies: GuardPolicies, limiter: Arc<FixedWindowLimiter>) -> Self {
        Self {
            policies: Arc::new(ArcSwap::from_pointee(policies)),
            limiter,
        }
    }
}

pub async fn guard_middleware(
    State(state): State<GuardState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let policies = state.policies.load_full();

    if policies.bypasses(&path) {
        return next.run(request).await;
    }

    let issued = match policies.csrf.inspect(request.method(), &path, request.headers()) {
        CsrfOutcome::Rejected => {
            tracing::warn!(method = %request.method(), path = %path, "Rejected request with invalid CSRF token");
            metrics::record_csrf_rejection();
            metrics::record_request("csrf_rejected");
            return Rejection::InvalidCsrfToken.into_response();
        }
        CsrfOutcome::Issue(token) => Some(token),
        CsrfOutcome::Exempt | CsrfOutcome::Safe | CsrfOutcome::Verified => None,
    };

    let quota = if policies.is_api(&path) {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = client_identifier(request.headers(), peer);

        match state.limiter.check(&client, &path) {
            RateDecision::Allowed(status) => Some(status),
            RateDecision::Limited { status, retry_after_secs } => {
                tracing::warn!(client = %client, path = %path, retry_after_secs, "Rate limit exceeded");
                metrics::record_rate_limited();
                metrics::record_request("rate_limited");
                return Rejection::RateLimited { status, retry_after_secs }.into_response();
            }
        }
    } else {
        None
    };

    let origin = request.headers().get(header::ORIGIN).cloned();
    if let Some(token) = &issued {
        request.extensions_mut().insert(IssuedCsrfToken(token.clone()));
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    if let Some(token) = issued {
        if let Some(cookie) = policies.csrf.set_cookie(&token) {
            headers.append(header::SET_COOKIE, cookie);
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(policies.csrf.header_name()),
            token.parse::<HeaderValue>(),
        ) {
            headers.insert(name, value);
        }
        tracing::debug!(path = %path, "Issued CSRF token");
        metrics::record_csrf_issued();
    }

    if let Some(status) = quota {
        insert_quota_headers(headers, &status);
    }

    policies.security.apply(headers);
    policies.cors.apply(origin.as_ref(), headers);

    metrics::record_request("forwarded");
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{ManualClock, RateLimitPolicy};
    use axum::http::StatusCode;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    fn app(max_requests: u32) -> (Router, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(FixedWindowLimiter::new(
            RateLimitPolicy { window_ms: 60_000, max_requests },
            clock.clone(),
        ));
        let state = GuardState::new(GuardPolicies::from_config(&GuardConfig::default()), limiter);
        let router = Router::new()
            .fallback(|| async { "downstream" })
            .layer(middleware::from_fn_with_state(state, guard_middleware));
        (router, clock)
    }

    fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_first_post_gets_cookie_and_passes() {
        let (app, _) = app(100);
        let response = app.oneshot(request("POST", "/api/content", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("csrf-token="));
        assert!(cookie.contains("SameSite=Strict"));
        let token = response.headers()["x-csrf-token"].to_str().unwrap().to_string();
        assert!(cookie.contains(&token));
        assert_eq!(body(response).await, "downstream");
    }

    #[tokio::test]
    async fn test_mismatched_token_is_forbidden() {
        let (app, _) = app(100);
        let response = app
            .oneshot(request(
                "POST",
                "/api/content",
                &[("cookie", "csrf-token=aaa"), ("x-csrf-token", "bbb")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!response.headers().contains_key("x-frame-options"));
        assert_eq!(body(response).await, "Invalid CSRF token");
    }

    #[tokio::test]
    async fn test_matching_token_passes_with_headers() {
        let (app, _) = app(100);
        let response = app
            .oneshot(request(
                "PATCH",
                "/api/content/7",
                &[("cookie", "csrf-token=aaa"), ("x-csrf-token", "aaa")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(header::SET_COOKIE));
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "99");
        assert_eq!(response.headers()["x-ratelimit-reset"], "60000");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_api_only() {
        let (app, clock) = app(2);
        let ok = &[("cookie", "csrf-token=t")];

        for _ in 0..2 {
            let r = app.clone().oneshot(request("GET", "/api/content", ok)).await.unwrap();
            assert_eq!(r.status(), StatusCode::OK);
        }

        clock.set(20);
        let limited = app.clone().oneshot(request("GET", "/api/content", ok)).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()["retry-after"], "60");
        assert_eq!(limited.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(body(limited).await, "Too Many Requests");

        for _ in 0..5 {
            let page = app.clone().oneshot(request("GET", "/dashboard", ok)).await.unwrap();
            assert_eq!(page.status(), StatusCode::OK);
            assert!(!page.headers().contains_key("x-ratelimit-limit"));
        }

        clock.set(61_000);
        let again = app.oneshot(request("GET", "/api/content", ok)).await.unwrap();
        assert_eq!(again.status(), StatusCode::OK);
        assert_eq!(again.headers()["x-ratelimit-remaining"], "1");
    }

    #[tokio::test]
    async fn test_forwarded_clients_have_separate_quotas() {
        let (app, _) = app(1);
        let a = &[("cookie", "csrf-token=t"), ("x-forwarded-for", "203.0.113.1")];
        let b = &[("cookie", "csrf-token=t"), ("x-forwarded-for", "203.0.113.2")];

        assert_eq!(app.clone().oneshot(request("GET", "/api/x", a)).await.unwrap().status(), StatusCode::OK);
        assert_eq!(app.clone().oneshot(request("GET", "/api/x", b)).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.oneshot(request("GET", "/api/x", a)).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_prefix_lookalikes_are_not_special() {
        let (app, _) = app(1);
        let cookie = &[("cookie", "csrf-token=t")];

        for _ in 0..3 {
            let r = app.clone().oneshot(request("GET", "/apiary", cookie)).await.unwrap();
            assert_eq!(r.status(), StatusCode::OK);
            assert!(!r.headers().contains_key("x-ratelimit-limit"));
        }

        let r = app.oneshot(request("POST", "/api/health-admin", cookie)).await.unwrap();
        assert_eq!(r.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_excluded_path_skips_csrf() {
        let (app, _) = app(100);
        let response = app
            .oneshot(request("POST", "/api/webhooks/ai", &[("cookie", "csrf-token=aaa")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn test_static_assets_bypass_everything() {
        let (app, _) = app(1);
        for path in ["/_next/static/chunk", "/favicon.ico", "/api/export.csv", "/api/export.csv"] {
            let response = app
                .clone()
                .oneshot(request("POST", path, &[("cookie", "csrf-token=a")]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
            assert!(!response.headers().contains_key("x-frame-options"));
        }
    }

    #[tokio::test]
    async fn test_cors_for_allowed_origin() {
        let (app, _) = app(100);
        let response = app
            .oneshot(request(
                "GET",
                "/dashboard",
                &[("cookie", "csrf-token=a"), ("origin", "http://localhost:3000")],
            ))
            .await
            .unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "http://localhost:3000");
        assert_eq!(response.headers()["access-control-max-age"], "86400");
    }
}
