//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Event loop and sessions produce:
//!     → logging.rs (structured log events, per-segment activity records)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Connection ID flows through every session log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
