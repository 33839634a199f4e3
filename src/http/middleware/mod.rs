//! Request interception layers.

pub mod pipeline;

pub use pipeline::{guard_middleware, GuardPolicies, GuardState, IssuedCsrfToken};
