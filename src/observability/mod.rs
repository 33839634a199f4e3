//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Guard decisions, sweeps and upstream calls produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout log aggregation
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
