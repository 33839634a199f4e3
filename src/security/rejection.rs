//! Terminal rejections produced by the guard.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::security::rate_limit::RateLimitStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Quota for this window is spent. The client may retry after
    /// `retry_after_secs`.
    #[error("Too Many Requests")]
    RateLimited {
        status: RateLimitStatus,
        retry_after_secs: u64,
    },

    /// Cookie present but the header token is missing or different.
    #[error("Invalid CSRF token")]
    InvalidCsrfToken,
}

impl Rejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Rejection::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::InvalidCsrfToken => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), self.to_string()).into_response();
        if let Rejection::RateLimited { status, retry_after_secs } = &self {
            let headers = response.headers_mut();
            insert_quota_headers(headers, status);
            headers.insert("retry-after", HeaderValue::from(*retry_after_secs));
        }
        response
    }
}

/// `X-RateLimit-*` headers describing the caller's quota.
pub fn insert_quota_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(status.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(status.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(status.reset_ms));
}
