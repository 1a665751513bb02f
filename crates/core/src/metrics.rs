//! Prometheus metrics for the migration pipeline.
//!
//! This module provides metrics for:
//! - Items per phase and outcome
//! - Phase durations
//! - Uploaded bytes
//! - Document rewrites

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

/// Registry holding every vaultlift metric.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    if let Err(e) = register_metrics(&registry) {
        warn!(error = %e, "Failed to register metrics");
    }
    registry
});

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Items processed by phase and result.
pub static ITEMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vaultlift_items_total", "Items processed per phase"),
        &["phase", "result"], // result: "success", "failed"
    )
    .unwrap()
});

/// Phase duration in seconds.
pub static PHASE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "vaultlift_phase_duration_seconds",
            "Duration of each pipeline phase",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["phase"],
    )
    .unwrap()
});

/// Bytes confirmed uploaded.
pub static UPLOAD_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("vaultlift_upload_bytes_total", "Total bytes uploaded").unwrap()
});

/// Documents visited by the link-rewrite phase, by result.
pub static DOCUMENTS_REWRITTEN: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vaultlift_documents_rewritten_total",
            "Documents processed by the link-rewrite phase",
        ),
        &["result"], // "changed", "unchanged", "failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Registers every metric in `registry`.
pub fn register_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(ITEMS_TOTAL.clone()))?;
    registry.register(Box::new(PHASE_DURATION.clone()))?;
    registry.register(Box::new(UPLOAD_BYTES.clone()))?;
    registry.register(Box::new(DOCUMENTS_REWRITTEN.clone()))?;
    Ok(())
}

/// Encodes the global registry in Prometheus text format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
