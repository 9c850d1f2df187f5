//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Scriptorium metrics
pub const METRICS_PREFIX: &str = "scriptorium";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 500ms (watermarked PDFs dominate the tail)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms - P50 target
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms - P99 target
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
];

/// Buckets for watermark rendering (CPU bound, grows with page count)
pub const WATERMARK_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    15.00, // 15s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_files_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total files encrypted and stored"
    );

    describe_counter!(
        format!("{}_bytes_ingested_total", METRICS_PREFIX),
        Unit::Bytes,
        "Total plaintext bytes encrypted and stored"
    );

    // Delivery metrics
    describe_counter!(
        format!("{}_deliveries_total", METRICS_PREFIX),
        Unit::Count,
        "File deliveries by kind and outcome"
    );

    describe_counter!(
        format!("{}_decryption_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Stored files that failed authentication or checksum verification"
    );

    describe_histogram!(
        format!("{}_watermark_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Watermark rendering latency in seconds"
    );

    // Access request metrics
    describe_counter!(
        format!("{}_access_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Access request transitions"
    );

    describe_counter!(
        format!("{}_orphans_swept_total", METRICS_PREFIX),
        Unit::Count,
        "Unreferenced blobs removed by the maintenance sweep"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record ingestion metrics
pub fn record_ingest(file_type: &str, size: u64) {
    counter!(
        format!("{}_files_ingested_total", METRICS_PREFIX),
        "file_type" => file_type.to_string()
    )
    .increment(1);

    counter!(
        format!("{}_bytes_ingested_total", METRICS_PREFIX),
        "file_type" => file_type.to_string()
    )
    .increment(size);
}

/// Helper to record a delivery attempt; `kind` is `view` or `download`
pub fn record_delivery(kind: &str, outcome: &str) {
    counter!(
        format!("{}_deliveries_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_decryption_failure() {
    counter!(format!("{}_decryption_failures_total", METRICS_PREFIX)).increment(1);
}

/// Helper to record watermark rendering time
pub fn record_watermark(format: &str, duration_secs: f64) {
    histogram!(
        format!("{}_watermark_duration_seconds", METRICS_PREFIX),
        "format" => format.to_string()
    )
    .record(duration_secs);
}

/// Helper to record an access request transition (`created`, `approved`, `rejected`)
pub fn record_access_request(transition: &str) {
    counter!(
        format!("{}_access_requests_total", METRICS_PREFIX),
        "transition" => transition.to_string()
    )
    .increment(1);
}

pub fn record_orphans_swept(count: usize) {
    counter!(format!("{}_orphans_swept_total", METRICS_PREFIX)).increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, WATERMARK_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }

        // P50 and P99 targets should be in buckets
        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.500));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        let metrics = RequestMetrics::start("GET", "/api/v1/manuscripts/{id}/files/{slot}");
        metrics.finish(200);
        record_ingest("pdf", 1024);
        record_delivery("view", "ok");
        record_decryption_failure();
        record_watermark("pdf", 0.02);
        record_access_request("created");
        record_orphans_swept(2);
    }
}
