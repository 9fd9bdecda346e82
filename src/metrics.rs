// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the WireGuard provisioner.
//!
//! All metrics carry the namespace prefix `wg_provisioner_` and are exposed
//! through the `/metrics` endpoint.
//!
//! # Metrics Categories
//!
//! - **Provisioning Metrics** - Outcome and duration of peer provisioning calls
//! - **Bootstrap Metrics** - Password-based controller key installations
//! - **Remote Execution Metrics** - Remote commands by outcome class
//! - **Pool Metrics** - Address allocations
//! - **Install Metrics** - Server installations through the playbooks
//!
//! # Example
//!
//! ```rust,no_run
//! use wg_provisioner::metrics::record_provisioning_success;
//!
//! record_provisioning_success(std::time::Duration::from_secs(3));
//! ```

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, Opts,
    Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all metrics
const METRICS_NAMESPACE: &str = "wg_provisioner";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Provisioning Metrics
// ============================================================================

/// Total number of provisioning calls by status
///
/// Labels:
/// - `status`: `success` or the error reason (e.g., `PoolExhausted`)
pub static PROVISIONING_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_provisioning_total"),
        "Total number of peer provisioning calls by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of provisioning calls in seconds
///
/// Labels:
/// - `status`: `success` or `error`
pub static PROVISIONING_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_provisioning_duration_seconds"),
        "Duration of peer provisioning calls in seconds",
    )
    .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]);
    let histogram = HistogramVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Bootstrap Metrics
// ============================================================================

/// Total number of password bootstraps by outcome
///
/// Labels:
/// - `outcome`: `success` or `failure`
pub static BOOTSTRAP_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_bootstraps_total"),
        "Total number of password-based controller key installations by outcome",
    );
    let counter = CounterVec::new(opts, &["outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Remote Execution Metrics
// ============================================================================

/// Total number of remote executions by outcome class
///
/// Labels:
/// - `class`: `success`, `auth_or_reachability`, `timeout` or `other`
pub static REMOTE_EXECUTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_remote_executions_total"),
        "Total number of remote command executions by outcome class",
    );
    let counter = CounterVec::new(opts, &["class"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Pool Metrics
// ============================================================================

/// Total number of new address allocations
pub static POOL_ALLOCATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_pool_allocations_total"),
        "Total number of new peer address allocations",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Number of addresses currently allocated
pub static POOL_ALLOCATED: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        format!("{METRICS_NAMESPACE}_pool_allocated"),
        "Number of peer addresses currently allocated",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Install Metrics
// ============================================================================

/// Total number of server installations by status
///
/// Labels:
/// - `status`: `success` or the error reason of the failed stage
pub static INSTALLS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_installs_total"),
        "Total number of server installations by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of server installations in seconds
pub static INSTALL_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_install_duration_seconds"),
        "Duration of server installations in seconds",
    )
    .buckets(vec![30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0]);
    let histogram = Histogram::with_opts(opts).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful provisioning call
pub fn record_provisioning_success(duration: Duration) {
    PROVISIONING_TOTAL.with_label_values(&["success"]).inc();
    PROVISIONING_DURATION_SECONDS
        .with_label_values(&["success"])
        .observe(duration.as_secs_f64());
}

/// Record a failed provisioning call
///
/// # Arguments
/// * `reason` - Error reason (see `ProvisionError::reason`)
/// * `duration` - Time spent before failing
pub fn record_provisioning_error(reason: &str, duration: Duration) {
    PROVISIONING_TOTAL.with_label_values(&[reason]).inc();
    PROVISIONING_DURATION_SECONDS
        .with_label_values(&["error"])
        .observe(duration.as_secs_f64());
}

/// Record a bootstrap attempt
pub fn record_bootstrap(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    BOOTSTRAP_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a remote execution outcome
///
/// # Arguments
/// * `class` - `success`, `auth_or_reachability`, `timeout` or `other`
pub fn record_remote_execution(class: &str) {
    REMOTE_EXECUTIONS_TOTAL.with_label_values(&[class]).inc();
}

/// Record a new pool allocation
///
/// # Arguments
/// * `allocated` - Number of allocations after this one
pub fn record_pool_allocation(allocated: usize) {
    POOL_ALLOCATIONS_TOTAL.inc();
    set_pool_allocated(allocated);
}

/// Set the allocated-addresses gauge
#[allow(clippy::cast_precision_loss)]
pub fn set_pool_allocated(allocated: usize) {
    POOL_ALLOCATED.set(allocated as f64);
}

/// Record the end of a server installation
///
/// # Arguments
/// * `status` - `success` or the error reason
/// * `duration` - Time spent across all stages
pub fn record_install(status: &str, duration: Duration) {
    INSTALLS_TOTAL.with_label_values(&[status]).inc();
    INSTALL_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
