//! Prometheus metrics for dte-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// HTTP request counter by method, route and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dte_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register http_requests_total")
});

/// HTTP request duration histogram by method and route.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dte_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register http_request_duration")
});

/// Document lifecycle transitions by document type and target status.
pub static DOCUMENT_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dte_document_transitions_total",
        "Total number of document status transitions",
        &["document_type", "status"]
    )
    .expect("Failed to register document_transitions_total")
});

/// Tax authority call duration by operation (sign, transmit, invalidate).
pub static AUTHORITY_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dte_authority_call_duration_seconds",
        "Tax authority call duration in seconds",
        &["operation"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register authority_call_duration")
});

/// Tax authority outcomes by operation.
pub static AUTHORITY_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dte_authority_outcomes_total",
        "Total number of tax authority outcomes",
        &["operation", "outcome"] // accepted, rejected, transport_error
    )
    .expect("Failed to register authority_outcomes_total")
});

/// Invalidation events by reason and resulting status.
pub static INVALIDATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dte_invalidations_total",
        "Total number of invalidation events by reason and status",
        &["reason", "status"]
    )
    .expect("Failed to register invalidations_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dte_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Repository query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dte_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&DOCUMENT_TRANSITIONS_TOTAL);
    Lazy::force(&AUTHORITY_CALL_DURATION);
    Lazy::force(&AUTHORITY_OUTCOMES_TOTAL);
    Lazy::force(&INVALIDATIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

/// Record an error by its stable code.
pub fn record_error(code: &str) {
    ERRORS_TOTAL.with_label_values(&[code]).inc();
}
