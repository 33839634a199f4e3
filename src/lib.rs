//! Request guard for the Living Theory of Change platform.
//!
//! Sits in front of the application and runs every request through
//! CSRF protection and fixed-window rate limiting, then decorates the
//! response with security and CORS headers.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
