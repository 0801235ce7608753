//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (human or JSON lines)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the edge to every backend call
//! - Metric updates are fire-and-forget and never fail a request

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
