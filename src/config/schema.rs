//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the request guard.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Application the guard forwards admitted requests to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,

    /// Cross-origin allow-list.
    pub cors: CorsConfig,

    /// Response hardening and deployment mode.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream application configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the application (e.g., "http://127.0.0.1:3000").
    /// When unset, only the built-in routes answer.
    pub address: Option<String>,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Length of one counting window in milliseconds.
    pub window_ms: u64,

    /// Requests admitted per (client, path) within one window.
    pub max_requests: u32,

    /// How often expired windows are swept, in milliseconds.
    pub sweep_interval_ms: u64,

    /// Only paths under this prefix are rate limited.
    pub api_prefix: String,
}

pub const DEFAULT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_MAX_REQUESTS: u32 = 100;

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            sweep_interval_ms: 60_000,
            api_prefix: "/api".to_string(),
        }
    }
}

/// CSRF token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Name of the cookie holding the token.
    pub cookie_name: String,

    /// Request header that must echo the cookie on mutating requests.
    pub header_name: String,

    /// Cookie lifetime in seconds.
    pub max_age_secs: u64,

    /// Path prefixes never subject to CSRF checks (health checks, webhooks).
    pub excluded_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "csrf-token".to_string(),
            header_name: "x-csrf-token".to_string(),
            max_age_secs: 24 * 60 * 60,
            excluded_paths: vec!["/api/health".to_string(), "/api/webhooks".to_string()],
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins (scheme://host[:port]) whose requests get CORS headers.
    pub allowed_origins: Vec<String>,

    /// Preflight cache duration in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            max_age_secs: 86_400,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Production mode: Secure cookies and HSTS.
    pub production: bool,

    /// Content-Security-Policy header value.
    pub content_security_policy: String,

    /// Path prefixes that bypass the guard entirely (build assets).
    pub bypass_prefixes: Vec<String>,
}

pub const DEFAULT_CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
script-src 'self' 'unsafe-eval' 'unsafe-inline'; \
style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https:; \
font-src 'self' data:; \
connect-src 'self' https://*.supabase.co wss://*.supabase.co https://api.openai.com; \
frame-ancestors 'none'";

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            production: false,
            content_security_policy: DEFAULT_CONTENT_SECURITY_POLICY.to_string(),
            bypass_prefixes: vec!["/_next".to_string()],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [rate_limit]
            max_requests = 5

            [security]
            production = true
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.rate_limit.window_ms, DEFAULT_WINDOW_MS);
        assert!(config.security.production);
        assert_eq!(config.csrf.cookie_name, "csrf-token");
        assert_eq!(config.csrf.max_age_secs, 86_400);
        assert!(config.upstream.address.is_none());
    }
}
