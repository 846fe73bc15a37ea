//! Metrics export for the feed server.
//!
//! Core and consumer metrics are recorded through the `metrics` facade in
//! their own crates; this module installs the Prometheus exporter and adds the
//! request counters of the HTTP surface.

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "feed_http_requests_total";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions sent before a recorder is installed are dropped.
pub fn init_metrics() {
    feed_core::metrics::describe();
    metrics::describe_counter!(names::REQUESTS_TOTAL, "HTTP requests by route and status");

    info!("Metrics initialized");
}

/// Install the Prometheus exporter and describe the metrics.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    init_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a served request.
pub fn record_request(route: &'static str, status: u16) {
    counter!(names::REQUESTS_TOTAL, "route" => route, "status" => status.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions_reach_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            init_metrics();
            record_request("/v1/feed", 200);
        });

        let rendered = handle.render();
        assert!(rendered.contains("# HELP feed_http_requests_total HTTP requests by route and status"));
        assert!(rendered.contains(r#"route="/v1/feed""#));
    }
}
