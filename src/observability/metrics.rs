//! Metrics collection and exposition.
//!
//! # Metrics
//! - `trellis_rate_limited_total` (counter): rejected by `rate_limit`, by route
//! - `trellis_csrf_rejected_total` (counter): rejected by `csrf`, by route
//! - `trellis_auth_rejected_total` (counter): rejected by `auth`, by route and reason
//! - `trellis_routes_registered` (gauge): routes mounted, by router kind

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus exporter on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_rate_limited(route: &str) {
    counter!("trellis_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_csrf_rejected(route: &str) {
    counter!("trellis_csrf_rejected_total", "route" => route.to_string()).increment(1);
}

pub fn record_auth_rejected(route: &str, reason: &'static str) {
    counter!(
        "trellis_auth_rejected_total",
        "route" => route.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_routes_registered(kind: &'static str, count: usize) {
    gauge!("trellis_routes_registered", "kind" => kind).set(count as f64);
}
