// SensorCache Server - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for the telemetry service.
//!
//! Engine counters live in the core's atomic `ServiceStats`; they are copied
//! into these gauges on every scrape. HTTP request counts are recorded
//! directly by the admission middleware.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge, GaugeVec,
    TextEncoder,
};
use sensorcache::{StatsSnapshot, TransportMetrics};
use tracing::warn;

lazy_static! {
    // ============================================================
    // Ingestion
    // ============================================================

    /// Readings merged into the cache.
    pub static ref READINGS_INGESTED_TOTAL: Gauge = register_gauge!(
        "sensorcache_readings_ingested_total",
        "Readings merged into the cache"
    ).expect("valid metric definition");

    /// Readings accepted by the message transport.
    pub static ref READINGS_PUBLISHED_TOTAL: Gauge = register_gauge!(
        "sensorcache_readings_published_total",
        "Readings accepted by the message transport"
    ).expect("valid metric definition");

    /// Readings the transport refused.
    pub static ref PUBLISH_FAILURES_TOTAL: Gauge = register_gauge!(
        "sensorcache_publish_failures_total",
        "Readings the message transport refused"
    ).expect("valid metric definition");

    /// Queue messages dropped as undecodable or invalid.
    pub static ref MALFORMED_MESSAGES_TOTAL: Gauge = register_gauge!(
        "sensorcache_malformed_messages_total",
        "Queue messages dropped as malformed"
    ).expect("valid metric definition");

    /// Transport message counts (labeled by outcome).
    pub static ref QUEUE_MESSAGES: GaugeVec = register_gauge_vec!(
        "sensorcache_queue_messages_total",
        "Messages offered to the transport by outcome",
        &["outcome"]
    ).expect("valid metric definition");

    // ============================================================
    // Scheduled jobs
    // ============================================================

    pub static ref FLUSHES_TOTAL: Gauge = register_gauge!(
        "sensorcache_flushes_total",
        "Completed flush passes"
    ).expect("valid metric definition");

    pub static ref RECORDS_FLUSHED_TOTAL: Gauge = register_gauge!(
        "sensorcache_records_flushed_total",
        "Sensor records saved by flush passes"
    ).expect("valid metric definition");

    pub static ref FLUSH_FAILURES_TOTAL: Gauge = register_gauge!(
        "sensorcache_flush_failures_total",
        "Sensor records a flush pass could not save"
    ).expect("valid metric definition");

    pub static ref CLEANUPS_TOTAL: Gauge = register_gauge!(
        "sensorcache_cleanups_total",
        "Completed retention cleanup passes"
    ).expect("valid metric definition");

    pub static ref DATES_PRUNED_TOTAL: Gauge = register_gauge!(
        "sensorcache_dates_pruned_total",
        "Dates removed by retention cleanup"
    ).expect("valid metric definition");

    // ============================================================
    // Cache and admission
    // ============================================================

    /// Sensors currently held in the cache.
    pub static ref CACHED_SENSORS: Gauge = register_gauge!(
        "sensorcache_cached_sensors",
        "Sensors currently held in the cache"
    ).expect("valid metric definition");

    /// Requests currently holding an admission slot.
    pub static ref IN_FLIGHT_REQUESTS: Gauge = register_gauge!(
        "sensorcache_in_flight_requests",
        "Requests currently holding an admission slot"
    ).expect("valid metric definition");

    pub static ref ADMISSION_REJECTED_TOTAL: Gauge = register_gauge!(
        "sensorcache_admission_rejected_total",
        "Requests abandoned by admission control"
    ).expect("valid metric definition");

    /// HTTP responses (labeled by route and status code).
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "sensorcache_http_requests_total",
        "HTTP responses by route and status",
        &["route", "status"]
    ).expect("valid metric definition");

    // ============================================================
    // Replay
    // ============================================================

    /// Current replay position (row index).
    pub static ref REPLAY_POSITION: Gauge = register_gauge!(
        "sensorcache_replay_position",
        "Current replay position (row index)"
    ).expect("valid metric definition");

    /// Rows in the replay dataset.
    pub static ref REPLAY_TOTAL_ROWS: Gauge = register_gauge!(
        "sensorcache_replay_total_rows",
        "Rows in the replay dataset"
    ).expect("valid metric definition");

    /// Replay speed multiplier (0 = unpaced).
    pub static ref REPLAY_SPEED: Gauge = register_gauge!(
        "sensorcache_replay_speed",
        "Replay speed multiplier (0 = unpaced)"
    ).expect("valid metric definition");
}

/// Copy engine counters into the registry.
pub fn update_service_metrics(stats: &StatsSnapshot, cached_sensors: usize, in_flight: usize) {
    READINGS_INGESTED_TOTAL.set(stats.readings_ingested as f64);
    READINGS_PUBLISHED_TOTAL.set(stats.readings_published as f64);
    PUBLISH_FAILURES_TOTAL.set(stats.publish_failures as f64);
    MALFORMED_MESSAGES_TOTAL.set(stats.malformed_dropped as f64);
    FLUSHES_TOTAL.set(stats.flushes as f64);
    RECORDS_FLUSHED_TOTAL.set(stats.records_flushed as f64);
    FLUSH_FAILURES_TOTAL.set(stats.flush_failures as f64);
    CLEANUPS_TOTAL.set(stats.cleanups as f64);
    DATES_PRUNED_TOTAL.set(stats.dates_pruned as f64);
    ADMISSION_REJECTED_TOTAL.set(stats.admission_rejected as f64);
    CACHED_SENSORS.set(cached_sensors as f64);
    IN_FLIGHT_REQUESTS.set(in_flight as f64);
}

/// Copy transport counters into the registry.
pub fn update_transport_metrics(transport: &TransportMetrics) {
    QUEUE_MESSAGES
        .with_label_values(&["published"])
        .set(transport.messages_published as f64);
    QUEUE_MESSAGES
        .with_label_values(&["rejected"])
        .set(transport.messages_rejected as f64);
}

/// Count one HTTP response.
pub fn record_http_request(route: &str, status: u16) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[route, &status.to_string()])
        .inc();
}

/// Update replay position metrics.
pub fn update_replay_metrics(position: usize, total: usize, speed: f64) {
    REPLAY_POSITION.set(position as f64);
    REPLAY_TOTAL_ROWS.set(total as f64);
    REPLAY_SPEED.set(speed);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Could not encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_service_metrics() {
        let stats = StatsSnapshot {
            readings_ingested: 12,
            flushes: 3,
            ..Default::default()
        };
        update_service_metrics(&stats, 4, 1);

        let output = encode_metrics();
        assert!(output.contains("sensorcache_readings_ingested_total"));
        assert!(output.contains("sensorcache_cached_sensors"));
        assert!(output.contains("sensorcache_flushes_total"));
    }

    #[test]
    fn test_http_request_counter() {
        record_http_request("/metrics-test", 200);
        record_http_request("/metrics-test", 200);
        let count = HTTP_REQUESTS_TOTAL
            .with_label_values(&["/metrics-test", "200"])
            .get();
        assert_eq!(count, 2.0);
    }

    #[test]
    fn test_transport_metrics() {
        update_transport_metrics(&TransportMetrics {
            messages_published: 7,
            bytes_published: 300,
            messages_rejected: 2,
        });
        assert_eq!(QUEUE_MESSAGES.with_label_values(&["rejected"]).get(), 2.0);
    }
}
