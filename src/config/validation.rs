//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and URL shapes.
//! Every error is collected rather than stopping at the first one.

use thiserror::Error;
use url::Url;

use crate::config::schema::GuardConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("rate_limit.window_ms must be greater than zero")]
    ZeroWindow,

    #[error("rate_limit.max_requests must be greater than zero")]
    ZeroMaxRequests,

    #[error("rate_limit.sweep_interval_ms must be greater than zero")]
    ZeroSweepInterval,

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("invalid CORS origin `{0}`")]
    InvalidOrigin(String),

    #[error("invalid upstream address `{0}`")]
    InvalidUpstream(String),

    #[error("`{field}` entry `{value}` must start with '/'")]
    RelativePrefix { field: &'static str, value: String },

    #[error("csrf.{0} must not be empty")]
    EmptyCsrfName(&'static str),
}

/// Validate a configuration, returning every problem found.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.rate_limit.window_ms == 0 {
        errors.push(ValidationError::ZeroWindow);
    }
    if config.rate_limit.max_requests == 0 {
        errors.push(ValidationError::ZeroMaxRequests);
    }
    if config.rate_limit.sweep_interval_ms == 0 {
        errors.push(ValidationError::ZeroSweepInterval);
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    for origin in &config.cors.allowed_origins {
        if !is_origin(origin) {
            errors.push(ValidationError::InvalidOrigin(origin.clone()));
        }
    }

    if let Some(upstream) = &config.upstream.address {
        match Url::parse(upstream) {
            Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
            _ => errors.push(ValidationError::InvalidUpstream(upstream.clone())),
        }
    }

    check_prefixes("rate_limit.api_prefix", std::slice::from_ref(&config.rate_limit.api_prefix), &mut errors);
    check_prefixes("csrf.excluded_paths", &config.csrf.excluded_paths, &mut errors);
    check_prefixes("security.bypass_prefixes", &config.security.bypass_prefixes, &mut errors);

    if config.csrf.cookie_name.is_empty() {
        errors.push(ValidationError::EmptyCsrfName("cookie_name"));
    }
    if config.csrf.header_name.is_empty() {
        errors.push(ValidationError::EmptyCsrfName("header_name"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// An origin is a bare scheme://host[:port] with no path, query or fragment.
pub(crate) fn is_origin(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some()
                && url.path() == "/"
                && !value.ends_with('/')
                && url.query().is_none()
                && url.fragment().is_none()
        }
        Err(_) => false,
    }
}

fn check_prefixes(field: &'static str, prefixes: &[String], errors: &mut Vec<ValidationError>) {
    for prefix in prefixes {
        if !prefix.starts_with('/') {
            errors.push(ValidationError::RelativePrefix {
                field,
                value: prefix.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GuardConfig::default();
        config.rate_limit.window_ms = 0;
        config.rate_limit.max_requests = 0;
        config.cors.allowed_origins = vec!["not a url".into(), "https://ok.example".into()];
        config.csrf.excluded_paths.push("webhooks".into());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ZeroWindow));
        assert!(errors.contains(&ValidationError::ZeroMaxRequests));
        assert!(errors.contains(&ValidationError::InvalidOrigin("not a url".into())));
    }

    #[test]
    fn test_origin_shape() {
        assert!(is_origin("https://theory.example"));
        assert!(is_origin("http://localhost:3000"));
        assert!(!is_origin("https://theory.example/"));
        assert!(!is_origin("https://theory.example/app"));
        assert!(!is_origin("ftp://theory.example"));
    }

    #[test]
    fn test_upstream_must_be_http() {
        let mut config = GuardConfig::default();
        config.upstream.address = Some("unix:/tmp/app.sock".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors, vec![ValidationError::InvalidUpstream("unix:/tmp/app.sock".into())]);
    }
}
