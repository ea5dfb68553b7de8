//! Metrics collection for the delta relay
//!
//! Counters live in a crate-level Prometheus registry and are created on
//! first use. If registration fails the relay keeps running without
//! metrics.

use crate::core::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry, Histogram, IntCounter,
    Registry,
};
use std::time::Instant;
use tracing::warn;

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Delta and document counters
pub struct Metrics {
    /// Deltas accepted by the exchange
    pub deltas_published: IntCounter,
    /// Deltas that failed to encode or publish
    pub deltas_failed: IntCounter,
    /// Documents fully published and marked as processed
    pub documents_processed: IntCounter,
    /// Documents flagged as errored
    pub documents_errored: IntCounter,
    /// Time spent encoding and publishing one delta
    pub publish_duration: Histogram,
    /// Encoded message bytes accepted by the exchange
    pub bytes_published: IntCounter,
}

impl Metrics {
    /// Create and register every metric
    pub fn new() -> Result<Self> {
        Ok(Self {
            deltas_published: register_int_counter_with_registry!(
                "dr_deltas_published_total",
                "Total number of deltas published",
                REGISTRY
            )?,
            deltas_failed: register_int_counter_with_registry!(
                "dr_deltas_failed_total",
                "Total number of deltas that failed to publish",
                REGISTRY
            )?,
            documents_processed: register_int_counter_with_registry!(
                "dr_documents_processed_total",
                "Total number of documents marked as processed",
                REGISTRY
            )?,
            documents_errored: register_int_counter_with_registry!(
                "dr_documents_errored_total",
                "Total number of documents flagged as errored",
                REGISTRY
            )?,
            publish_duration: register_histogram_with_registry!(
                "dr_publish_duration_seconds",
                "Duration of encoding and publishing one delta in seconds",
                vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
                REGISTRY
            )?,
            bytes_published: register_int_counter_with_registry!(
                "dr_bytes_published_total",
                "Total encoded bytes published",
                REGISTRY
            )?,
        })
    }

    /// Get the global metrics instance, if registration succeeded
    pub fn global() -> Option<&'static Metrics> {
        static INSTANCE: Lazy<Option<Metrics>> = Lazy::new(|| match Metrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(error = %e, "Metrics registration failed, metrics disabled");
                None
            }
        });
        INSTANCE.as_ref()
    }
}

/// Record a delta accepted by the exchange
pub fn record_published(bytes: usize) {
    if let Some(metrics) = Metrics::global() {
        metrics.deltas_published.inc();
        metrics.bytes_published.inc_by(bytes as u64);
    }
}

/// Record a delta that failed to encode or publish
pub fn record_failed() {
    if let Some(metrics) = Metrics::global() {
        metrics.deltas_failed.inc();
    }
}

/// Record a document marked as processed
pub fn record_document_processed() {
    if let Some(metrics) = Metrics::global() {
        metrics.documents_processed.inc();
    }
}

/// Record a document flagged as errored
pub fn record_document_errored() {
    if let Some(metrics) = Metrics::global() {
        metrics.documents_errored.inc();
    }
}

/// Timer for measuring operation duration with automatic histogram recording
pub struct Timer {
    start: Instant,
    histogram: Option<Histogram>,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram: Some(histogram),
        }
    }

    /// Start a timer on the publish duration histogram
    pub fn publish() -> Self {
        Self {
            start: Instant::now(),
            histogram: Metrics::global().map(|metrics| metrics.publish_duration.clone()),
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        if let Some(histogram) = self.histogram {
            histogram.observe(self.start.elapsed().as_secs_f64());
        }
    }
}

/// Initialize the metrics registry by creating the global metrics instance
pub fn init_registry() {
    let _ = Metrics::global();
}

/// Get the Prometheus registry
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect and return all metrics as a Prometheus-formatted string
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
