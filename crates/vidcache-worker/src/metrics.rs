//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Transcode metrics
    pub const TRANSCODES_STARTED_TOTAL: &str = "vidcache_transcodes_started_total";
    pub const TRANSCODES_COMPLETED_TOTAL: &str = "vidcache_transcodes_completed_total";
    pub const TRANSCODES_FAILED_TOTAL: &str = "vidcache_transcodes_failed_total";
    pub const TRANSCODE_DURATION_SECONDS: &str = "vidcache_transcode_duration_seconds";

    // Reaper metrics
    pub const REAPER_EVICTIONS_TOTAL: &str = "vidcache_reaper_evictions_total";
    pub const REAPER_STOPPED_TOTAL: &str = "vidcache_reaper_stopped_total";
    pub const REAPER_STEP_FAILURES_TOTAL: &str = "vidcache_reaper_step_failures_total";

    // Cache metrics
    pub const CACHE_USABLE_BYTES: &str = "vidcache_cache_usable_bytes";
    pub const RESOLVE_TOTAL: &str = "vidcache_resolve_total";
    pub const IMAGES_RESIZED_TOTAL: &str = "vidcache_images_resized_total";
}

pub fn record_transcode_started(resolution: &str) {
    let labels = [("resolution", resolution.to_string())];
    counter!(names::TRANSCODES_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_transcode_completed(resolution: &str, duration_secs: f64) {
    let labels = [("resolution", resolution.to_string())];
    counter!(names::TRANSCODES_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::TRANSCODE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// `reason` is `failed` or `stopped`.
pub fn record_transcode_failed(resolution: &str, reason: &str) {
    let labels = [
        ("resolution", resolution.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!(names::TRANSCODES_FAILED_TOTAL, &labels).increment(1);
}

/// `set` is `video`, `thumbnail` or `album`.
pub fn record_eviction(set: &str) {
    let labels = [("set", set.to_string())];
    counter!(names::REAPER_EVICTIONS_TOTAL, &labels).increment(1);
}

pub fn record_reaper_stopped() {
    counter!(names::REAPER_STOPPED_TOTAL).increment(1);
}

pub fn record_reaper_step_failure() {
    counter!(names::REAPER_STEP_FAILURES_TOTAL).increment(1);
}

pub fn set_cache_usable_bytes(bytes: u64) {
    gauge!(names::CACHE_USABLE_BYTES).set(bytes as f64);
}

/// `outcome` is `ready`, `retry_later`, `serve_original` or `capacity_exceeded`.
pub fn record_resolve(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::RESOLVE_TOTAL, &labels).increment(1);
}

pub fn record_images_resized(count: usize) {
    counter!(names::IMAGES_RESIZED_TOTAL).increment(count as u64);
}
