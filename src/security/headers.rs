//! Security and CORS response headers.
//!
//! # Responsibilities
//! - Attach hardening headers to every response that reached the app
//! - Emit HSTS only in production
//! - Echo the request origin for CORS only when it is allow-listed

use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue};

use crate::config::{CorsConfig, SecurityConfig};

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-CSRF-Token";
const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Static hardening headers.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    csp: Option<HeaderValue>,
    production: bool,
}

impl SecurityHeaders {
    pub fn new(config: &SecurityConfig) -> Self {
        let csp = HeaderValue::from_str(&config.content_security_policy).ok();
        if csp.is_none() {
            tracing::warn!("Content-Security-Policy is not a valid header value, omitting it");
        }
        Self {
            csp,
            production: config.production,
        }
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
        headers.insert(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
        headers.insert(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
        );
        if let Some(csp) = &self.csp {
            headers.insert(header::CONTENT_SECURITY_POLICY, csp.clone());
        }
        if self.production {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
        }
    }
}

/// Origin allow-list.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
    max_age: HeaderValue,
}

impl CorsPolicy {
    pub fn new(config: &CorsConfig) -> Self {
        Self {
            allowed_origins: config.allowed_origins.clone(),
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == origin)
    }

    /// Add CORS headers when `origin` is allow-listed; otherwise leave the
    /// response untouched.
    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));

        let Some(origin) = origin else { return };
        let allowed = origin.to_str().map(|o| self.is_allowed(o)).unwrap_or(false);
        if !allowed {
            return;
        }

        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
        headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }
}
