//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → csrf.rs (issue or validate the anti-forgery token)
//!     → rate_limit.rs (fixed window per client + path, API paths only)
//!     → application
//!     → headers.rs (hardening + CORS on the way out)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a failed check is a terminal response, see rejection.rs
//! - No trust in client input beyond the configured proxy headers
//! - All state is in memory and single-process

pub mod clock;
pub mod csrf;
pub mod headers;
pub mod rate_limit;
pub mod rejection;

pub use clock::{Clock, ManualClock, SystemClock};
pub use csrf::{CsrfGuard, CsrfOutcome};
pub use headers::{CorsPolicy, SecurityHeaders};
pub use rate_limit::{FixedWindowLimiter, RateDecision, RateLimitPolicy, RateLimitStatus};
pub use rejection::Rejection;

/// True when `path` is `prefix` itself or lies below it on a `/` boundary,
/// so `/api/health` covers `/api/health/db` but not `/api/health-admin`.
pub fn path_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_under_respects_segments() {
        assert!(path_under("/api", "/api"));
        assert!(path_under("/api/content", "/api"));
        assert!(path_under("/api/health/db", "/api/health"));
        assert!(!path_under("/apiary", "/api"));
        assert!(!path_under("/api/health-admin/users", "/api/health"));
        assert!(!path_under("/api/webhooks-internal/delete", "/api/webhooks"));
        assert!(path_under("/_next/static/chunk", "/_next/"));
        assert!(!path_under("/dashboard", "/api"));
    }
}
