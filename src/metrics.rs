//! Prometheus metrics for the diagnostic server.
//!
//! The exporter is optional: it is only installed when `--metrics-port` is
//! non-zero. Without an installed recorder every `record_*` call below is a
//! no-op, so middleware and handlers record unconditionally.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `webprobe_requests_total` - Requests served (labels: method, status)
//! - `webprobe_auth_failures_total` - Rejected Basic Auth attempts (label: reason)
//! - `webprobe_log_sink_errors_total` - Records the live log stream failed to write
//! - `webprobe_memory_churn_tasks_started_total` - Background churn tasks spawned by `/_/alloc`
//!
//! ## Histograms
//! - `webprobe_request_duration_seconds` - Request duration (labels: method, status)

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "webprobe_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "webprobe_request_duration_seconds";
    pub const AUTH_FAILURES_TOTAL: &str = "webprobe_auth_failures_total";
    pub const LOG_SINK_ERRORS_TOTAL: &str = "webprobe_log_sink_errors_total";
    pub const CHURN_TASKS_STARTED_TOTAL: &str = "webprobe_memory_churn_tasks_started_total";
}

/// Install the Prometheus exporter on `metrics_addr` and describe all metrics.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of HTTP requests served");
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of rejected Basic Auth attempts"
    );
    describe_counter!(
        names::LOG_SINK_ERRORS_TOTAL,
        "Total number of log records the live stream failed to write"
    );
    describe_counter!(
        names::CHURN_TASKS_STARTED_TOTAL,
        "Total number of memory churn tasks started"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a completed request and its duration.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record a rejected authentication attempt.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Record a failed write to the live log stream.
pub fn record_log_sink_error() {
    counter!(names::LOG_SINK_ERRORS_TOTAL).increment(1);
}

/// Record a memory churn task being spawned.
pub fn record_churn_task_started() {
    counter!(names::CHURN_TASKS_STARTED_TOTAL).increment(1);
}
