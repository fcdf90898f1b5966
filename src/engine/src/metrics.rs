//! Sync metrics.
//!
//! Components receive a [`MetricsSink`] at construction; nothing is recorded
//! through process-global state.

use std::time::Duration;

use image_syncer_core::error::{Result, SyncError};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};

/// Histogram buckets for per-operation durations, in seconds.
const OPERATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Receiver for sync events.
pub trait MetricsSink: Send + Sync {
    /// An image was transferred to the target registry.
    fn image_synced(&self, source_registry: &str);

    /// An image was already present in the target registry.
    fn image_skipped(&self, source_registry: &str);

    /// An image could not be synced; `reason` is a short machine label.
    fn image_failed(&self, source_registry: &str, reason: &str);

    /// Number of images found by the current cycle.
    fn images_discovered(&self, count: usize);

    fn cycle_completed(&self, duration: Duration);

    fn operation_duration(&self, operation: &str, duration: Duration);
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn image_synced(&self, _source_registry: &str) {}
    fn image_skipped(&self, _source_registry: &str) {}
    fn image_failed(&self, _source_registry: &str, _reason: &str) {}
    fn images_discovered(&self, _count: usize) {}
    fn cycle_completed(&self, _duration: Duration) {}
    fn operation_duration(&self, _operation: &str, _duration: Duration) {}
}

/// Prometheus-backed sink with its own registry.
pub struct PrometheusMetrics {
    registry: Registry,
    target_registry: String,
    synced: IntCounterVec,
    failed: IntCounterVec,
    skipped: IntCounterVec,
    cycle_duration: Histogram,
    processed_current: Gauge,
    operation_duration: HistogramVec,
}

impl PrometheusMetrics {
    /// Create and register all collectors. `target_registry` labels every
    /// per-image counter.
    pub fn new(target_registry: impl Into<String>) -> Result<Self> {
        let registry = Registry::new();

        let synced = IntCounterVec::new(
            Opts::new("images_synced_total", "Total number of images synced"),
            &["source_registry", "target_registry"],
        )
        .map_err(metrics_error)?;
        let failed = IntCounterVec::new(
            Opts::new(
                "images_sync_failed_total",
                "Total number of failed image syncs",
            ),
            &["source_registry", "target_registry", "reason"],
        )
        .map_err(metrics_error)?;
        let skipped = IntCounterVec::new(
            Opts::new(
                "images_skipped_total",
                "Total number of images skipped (already present)",
            ),
            &["source_registry", "target_registry"],
        )
        .map_err(metrics_error)?;
        let cycle_duration = Histogram::with_opts(HistogramOpts::new(
            "sync_cycle_duration_seconds",
            "Duration of a complete sync cycle",
        ))
        .map_err(metrics_error)?;
        let processed_current = Gauge::new(
            "images_processed_current",
            "Number of images discovered in the current cycle",
        )
        .map_err(metrics_error)?;
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "image_sync_duration_seconds",
                "Duration of individual image operations",
            )
            .buckets(OPERATION_BUCKETS.to_vec()),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(synced.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(failed.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(skipped.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cycle_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(processed_current.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(operation_duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            target_registry: target_registry.into(),
            synced,
            failed,
            skipped,
            cycle_duration,
            processed_current,
            operation_duration,
        })
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer)
            .map_err(|e| SyncError::Other(format!("Metrics output is not UTF-8: {}", e)))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl MetricsSink for PrometheusMetrics {
    fn image_synced(&self, source_registry: &str) {
        self.synced
            .with_label_values(&[source_registry, &self.target_registry])
            .inc();
    }

    fn image_skipped(&self, source_registry: &str) {
        self.skipped
            .with_label_values(&[source_registry, &self.target_registry])
            .inc();
    }

    fn image_failed(&self, source_registry: &str, reason: &str) {
        self.failed
            .with_label_values(&[source_registry, &self.target_registry, reason])
            .inc();
    }

    fn images_discovered(&self, count: usize) {
        self.processed_current.set(count as f64);
    }

    fn cycle_completed(&self, duration: Duration) {
        self.cycle_duration.observe(duration.as_secs_f64());
    }

    fn operation_duration(&self, operation: &str, duration: Duration) {
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }
}

fn metrics_error(e: prometheus::Error) -> SyncError {
    SyncError::Other(format!("Metrics error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_recorded_counters() {
        let metrics = PrometheusMetrics::new("registry.internal").unwrap();
        metrics.image_synced("docker.io");
        metrics.image_synced("docker.io");
        metrics.image_skipped("registry.internal");
        metrics.image_failed("ghcr.io", "copy_failed");

        let output = metrics.export().unwrap();
        assert!(output.contains(
            r#"images_synced_total{source_registry="docker.io",target_registry="registry.internal"} 2"#
        ));
        assert!(output.contains("images_skipped_total"));
        assert!(output.contains(r#"reason="copy_failed""#));
    }

    #[test]
    fn test_gauge_tracks_latest_cycle() {
        let metrics = PrometheusMetrics::new("registry.internal").unwrap();
        metrics.images_discovered(12);
        metrics.images_discovered(3);

        let output = metrics.export().unwrap();
        assert!(output.contains("images_processed_current 3"));
    }

    #[test]
    fn test_operation_histogram_buckets() {
        let metrics = PrometheusMetrics::new("registry.internal").unwrap();
        metrics.operation_duration("copy", Duration::from_secs(7));
        metrics.cycle_completed(Duration::from_millis(1500));

        let output = metrics.export().unwrap();
        assert!(output.contains(r#"image_sync_duration_seconds_bucket{operation="copy",le="10"} 1"#));
        assert!(output.contains(r#"image_sync_duration_seconds_bucket{operation="copy",le="5"} 0"#));
        assert!(output.contains("sync_cycle_duration_seconds_count 1"));
    }

    #[test]
    fn test_separate_instances_do_not_collide() {
        let a = PrometheusMetrics::new("a.example").unwrap();
        let b = PrometheusMetrics::new("b.example").unwrap();
        a.image_synced("docker.io");

        assert!(!b.export().unwrap().contains("a.example"));
    }

    #[test]
    fn test_noop_metrics() {
        let metrics = NoopMetrics;
        metrics.image_synced("docker.io");
        metrics.cycle_completed(Duration::from_secs(1));
    }
}
