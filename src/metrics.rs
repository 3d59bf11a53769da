//! Metrics for backup runs, uploads and retention
//!
//! Prometheus-compatible counters registered in the default registry. The app logs a
//! snapshot on shutdown; embedders can expose [`gather`] on an endpoint of their own.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    /// Backup runs by database and outcome
    static ref BACKUP_RUNS: IntCounterVec = register_int_counter_vec!(
        "vaultkeeper_backup_runs_total",
        "Total number of backup pipeline runs",
        &["database", "status"]
    ).expect("backup run counter registers once");

    /// End-to-end pipeline duration
    static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "vaultkeeper_backup_duration_seconds",
        "Backup pipeline duration in seconds",
        &["database"],
        vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).expect("backup duration histogram registers once");

    /// Size of the last artifact handed to the fan-out
    static ref ARTIFACT_BYTES: IntGaugeVec = register_int_gauge_vec!(
        "vaultkeeper_artifact_bytes",
        "Size of the most recent artifact in bytes",
        &["database"]
    ).expect("artifact size gauge registers once");

    /// Uploads by target and outcome
    static ref UPLOADS: IntCounterVec = register_int_counter_vec!(
        "vaultkeeper_uploads_total",
        "Total number of artifact uploads",
        &["target", "status"]
    ).expect("upload counter registers once");

    /// Retention deletions by target and outcome
    static ref CLEANUP_DELETIONS: IntCounterVec = register_int_counter_vec!(
        "vaultkeeper_cleanup_deletions_total",
        "Total number of expired artifacts processed by retention",
        &["target", "status"]
    ).expect("cleanup counter registers once");
}

/// Record the outcome of one pipeline run
pub fn record_backup(database: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failed" };
    BACKUP_RUNS.with_label_values(&[database, status]).inc();
    BACKUP_DURATION
        .with_label_values(&[database])
        .observe(duration_secs);
}

/// Record the size of the artifact about to be uploaded
pub fn record_artifact_size(database: &str, bytes: u64) {
    ARTIFACT_BYTES
        .with_label_values(&[database])
        .set(i64::try_from(bytes).unwrap_or(i64::MAX));
}

/// Record one upload attempt
pub fn record_upload(target: &str, status: &str) {
    UPLOADS.with_label_values(&[target, status]).inc();
}

/// Record the deletions performed on one target
pub fn record_cleanup(target: &str, deleted: usize, failed: usize) {
    CLEANUP_DELETIONS
        .with_label_values(&[target, "deleted"])
        .inc_by(deleted as u64);
    CLEANUP_DELETIONS
        .with_label_values(&[target, "failed"])
        .inc_by(failed as u64);
}

/// Text exposition of every registered metric
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
