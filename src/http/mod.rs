//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → middleware/pipeline.rs (bypass, CSRF, rate limit)
//!     → built-in route or upstream forward
//!     → middleware/pipeline.rs (security + CORS headers)
//!     → Send to client
//! ```

pub mod middleware;
pub mod server;

pub use server::{AppState, HttpServer};
