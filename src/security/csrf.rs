//! Double-submit CSRF protection.
//!
//! A random token is planted in a `SameSite=Strict`, `HttpOnly` cookie the
//! first time a client shows up without one. Mutating requests must then
//! repeat the cookie value in the `x-csrf-token` header.
//!
//! # Design Decisions
//! - A request that arrives without the cookie is never blocked; it is
//!   handed a token instead, since it could not have known one
//! - Tokens are not rotated for the life of the cookie
//! - Cookie and header values are compared in constant time

use axum::http::{HeaderMap, HeaderValue, Method};
use rand::RngCore;

use crate::config::CsrfConfig;
use crate::security::path_under;

/// Raw token length before hex encoding.
const TOKEN_BYTES: usize = 32;

/// What the guard decided about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfOutcome {
    /// Path is excluded from CSRF handling.
    Exempt,
    /// No cookie yet: let the request through and set this token.
    Issue(String),
    /// Read-only request from a client that already holds a token.
    Safe,
    /// Mutating request whose header matched the cookie.
    Verified,
    /// Mutating request with a missing or mismatched header.
    Rejected,
}

/// Issues and validates anti-forgery tokens.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    cookie_name: String,
    header_name: String,
    max_age_secs: u64,
    excluded_paths: Vec<String>,
    secure: bool,
}

impl CsrfGuard {
    pub fn new(config: &CsrfConfig, production: bool) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.to_ascii_lowercase(),
            max_age_secs: config.max_age_secs,
            excluded_paths: config.excluded_paths.clone(),
            secure: production,
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|prefix| path_under(path, prefix))
    }

    /// Decide what to do with a request.
    pub fn inspect(&self, method: &Method, path: &str, headers: &HeaderMap) -> CsrfOutcome {
        if self.is_excluded(path) {
            return CsrfOutcome::Exempt;
        }

        let Some(cookie_token) = self.token_from_cookies(headers) else {
            return CsrfOutcome::Issue(generate_token());
        };

        if !is_state_changing(method) {
            return CsrfOutcome::Safe;
        }

        let header_token = headers
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        if !header_token.is_empty() && constant_time_eq(cookie_token, header_token) {
            CsrfOutcome::Verified
        } else {
            CsrfOutcome::Rejected
        }
    }

    /// The token held in the request's cookie, if any.
    pub fn token_from_cookies<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(axum::http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// `Set-Cookie` value delivering `token`.
    pub fn set_cookie(&self, token: &str) -> Option<HeaderValue> {
        let secure = if self.secure { "; Secure" } else { "" };
        let cookie = format!(
            "{}={token}; Path=/; Max-Age={}; HttpOnly{secure}; SameSite=Strict",
            self.cookie_name, self.max_age_secs
        );
        HeaderValue::from_str(&cookie).ok()
    }
}

/// POST, PUT, DELETE and PATCH need a token; everything else is read-only.
pub fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    )
}

/// Fresh hex-encoded token from the thread-local CSPRNG.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Equality whose running time depends only on the input lengths.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
