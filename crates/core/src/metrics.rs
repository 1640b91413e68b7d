//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Conversions (results, wall-clock duration)
//! - Pipeline builds
//! - Codec capability probes

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts};

// =============================================================================
// Conversion Metrics
// =============================================================================

/// Conversions total by result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("soundconv_conversions_total", "Total file conversions"),
        &["result"], // "completed", "failed", "cancelled", "start_failed"
    )
    .expect("conversions metric definition is valid")
});

/// Conversion duration in seconds, from start to the terminal event.
pub static CONVERSION_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "soundconv_conversion_duration_seconds",
            "Duration of file conversions",
        )
        .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )
    .expect("conversion duration metric definition is valid")
});

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Pipeline builds total by result.
pub static PIPELINE_BUILDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("soundconv_pipeline_builds_total", "Total pipeline builds"),
        &["result"], // "success" or the construct error kind
    )
    .expect("pipeline builds metric definition is valid")
});

/// Capability probes total by codec and result.
pub static CAPABILITY_PROBES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "soundconv_capability_probes_total",
            "Total codec capability probes",
        ),
        &["codec", "result"], // result: "supported", "missing"
    )
    .expect("capability probes metric definition is valid")
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(PIPELINE_BUILDS.clone()),
        Box::new(CAPABILITY_PROBES.clone()),
    ]
}
