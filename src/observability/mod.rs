//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (tracing subscriber, pretty or JSON)
//!     → metrics.rs (counters via the `metrics` facade)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (when enabled)
//! ```
//!
//! # Design Decisions
//! - Request IDs are attached by tower-http and show up in request spans
//! - Metric updates go through the facade and are no-ops without an exporter

pub mod logging;
pub mod metrics;

pub use logging::{bootstrap_subscriber, init_logging};
pub use metrics::init_metrics;
