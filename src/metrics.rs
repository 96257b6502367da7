/// Prometheus metrics for the shortlink API
///
/// Route labels use the matched route pattern, never the raw path, so label
/// cardinality stays bounded. Unmatched requests use the literal "UNMATCHED".
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec,
    register_int_gauge, Counter, CounterVec, Encoder, Histogram, HistogramVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    /// Total HTTP requests by method, route pattern and status.
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_request_total",
        "Total number of HTTP requests",
        &["method", "route", "status"]
    )
    .unwrap();

    /// HTTP request latency distributions by method and route pattern.
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latency distributions",
        &["method", "route"]
    )
    .unwrap();

    /// Requests currently being processed.
    pub static ref HTTP_INFLIGHT_REQUESTS: IntGauge = register_int_gauge!(
        "http_inflight_requests",
        "Current number of in-flight HTTP requests"
    )
    .unwrap();

    /// Cache operation counters.
    /// level: "l1" or "l2"; result: "hit", "miss", "hit_negative".
    pub static ref CACHE_OPERATIONS: CounterVec = register_counter_vec!(
        "shortlink_cache_operations_total",
        "Cache operation counters",
        &["level", "result"]
    )
    .unwrap();

    /// Shortlinks created.
    pub static ref SHORTLINK_CREATED: Counter = register_counter!(
        "shortlink_created_total",
        "Total shortlinks created"
    )
    .unwrap();

    /// Redirects served.
    pub static ref SHORTLINK_REDIRECTS: Counter = register_counter!(
        "shortlink_redirects_total",
        "Total shortlink redirects"
    )
    .unwrap();

    /// Click-stats flush latency.
    pub static ref STATS_FLUSH_DURATION: Histogram = register_histogram!(
        "shortlink_stats_flush_duration_seconds",
        "Click stats batch flush latency",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    /// Click-stats flush batch sizes.
    pub static ref STATS_FLUSH_SIZE: Histogram = register_histogram!(
        "shortlink_stats_flush_size",
        "Events per click stats flush",
        vec![1.0, 10.0, 25.0, 50.0, 75.0, 100.0, 150.0, 200.0]
    )
    .unwrap();
}

/// Render all registered metrics in Prometheus text exposition format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a cache tier access.
pub fn record_cache_op(level: &str, result: &str) {
    CACHE_OPERATIONS.with_label_values(&[level, result]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_http_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/healthz", "200"])
            .inc();
        HTTP_REQUEST_DURATION_SECONDS
            .with_label_values(&["GET", "/healthz"])
            .observe(0.002);

        let out = render_metrics();
        assert!(out.contains("http_request_total"));
        assert!(out.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_cache_op_labels() {
        record_cache_op("l1", "hit");
        record_cache_op("l2", "hit_negative");
        let out = render_metrics();
        assert!(out.contains("shortlink_cache_operations_total"));
    }

    #[test]
    fn test_flush_histograms() {
        STATS_FLUSH_DURATION.observe(0.01);
        STATS_FLUSH_SIZE.observe(42.0);
        let out = render_metrics();
        assert!(out.contains("shortlink_stats_flush_duration_seconds"));
        assert!(out.contains("shortlink_stats_flush_size"));
    }
}
