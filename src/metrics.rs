//! Metrics initialization for Prometheus exporter.
//!
//! Recording helpers are no-ops until [`init`] installs an exporter.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::network::CaptureStats;

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape.
///
/// When metrics are disabled, this is a no-op. The `metrics` crate
/// handles unregistered metrics gracefully (they become no-ops).
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|e| Error::Metrics(e.to_string()))?;

    Ok(())
}

pub(crate) fn packet_captured() {
    ::metrics::counter!("detector_packets_captured_total").increment(1);
}

pub(crate) fn packet_dropped() {
    ::metrics::counter!("detector_packets_dropped_total").increment(1);
}

pub(crate) fn dns_response() {
    ::metrics::counter!("detector_dns_responses_total").increment(1);
}

pub(crate) fn dns_record_dropped() {
    ::metrics::counter!("detector_dns_records_dropped_total").increment(1);
}

pub(crate) fn batch_flushed() {
    ::metrics::counter!("detector_batches_flushed_total").increment(1);
}

pub(crate) fn batch_dropped() {
    ::metrics::counter!("detector_batches_dropped_total").increment(1);
}

/// Count domains removed from a batch by one list.
pub(crate) fn domains_filtered(list: &'static str, count: usize) {
    ::metrics::counter!("detector_domains_filtered_total", "list" => list)
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

pub(crate) fn lookup_failure() {
    ::metrics::counter!("detector_lookup_failures_total").increment(1);
}

pub(crate) fn batch_published() {
    ::metrics::counter!("detector_batches_published_total").increment(1);
}

pub(crate) fn publish_failure() {
    ::metrics::counter!("detector_publish_failures_total").increment(1);
}

pub(crate) fn capture_stats(stats: &CaptureStats) {
    ::metrics::gauge!("detector_capture_received").set(f64::from(stats.received));
    ::metrics::gauge!("detector_capture_dropped").set(f64::from(stats.dropped));
    ::metrics::gauge!("detector_capture_if_dropped").set(f64::from(stats.if_dropped));
}
