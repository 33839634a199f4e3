//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, overlay environment)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → HttpServer::apply_config swaps guard policies
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Environment values that fail to parse degrade to defaults, never abort
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{apply_env, load_config, load_with_overrides, CliOverrides, ConfigError};
pub use schema::{
    CorsConfig, CsrfConfig, GuardConfig, ListenerConfig, ObservabilityConfig, RateLimitConfig,
    SecurityConfig, TimeoutConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
