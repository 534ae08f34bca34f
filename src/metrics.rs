// Copyright (c) 2025 Skygear Authors
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the custom domain controller.
//!
//! All metrics are namespaced with `domain_skygear_io` and registered in a
//! process-wide registry exposed at `/metrics`.
//!
//! # Metrics
//!
//! - `domain_skygear_io_reconciliations_total{resource_type, status}`
//! - `domain_skygear_io_reconciliation_duration_seconds{resource_type}`
//! - `domain_skygear_io_requeues_total{resource_type, reason}`
//! - `domain_skygear_io_verification_attempts_total{result}`
//! - `domain_skygear_io_provider_errors_total{provider}`
//! - `domain_skygear_io_finalizer_transitions_total{resource_type, action}`

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

const METRICS_NAMESPACE: &str = "domain_skygear_io";

/// Registry holding every controller metric.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by resource type and reason",
    );
    let counter = CounterVec::new(opts, &["resource_type", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Domain Metrics
// ============================================================================

pub static VERIFICATION_ATTEMPTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_verification_attempts_total"),
        "Total number of DNS verification attempts by result",
    );
    let counter = CounterVec::new(opts, &["result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

pub static PROVIDER_ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_provider_errors_total"),
        "Total number of failed provider calls by provider",
    );
    let counter = CounterVec::new(opts, &["provider"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

pub static FINALIZER_TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_finalizer_transitions_total"),
        "Total number of finalizers added or removed by resource type",
    );
    let counter = CounterVec::new(opts, &["resource_type", "action"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

pub fn record_requeue(resource_type: &str, reason: &str) {
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

/// `result` is one of `verified`, `failed`.
pub fn record_verification_attempt(result: &str) {
    VERIFICATION_ATTEMPTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_provider_error(provider: &str) {
    PROVIDER_ERRORS_TOTAL.with_label_values(&[provider]).inc();
}

/// `action` is one of `added`, `removed`.
pub fn record_finalizer(resource_type: &str, action: &str) {
    FINALIZER_TRANSITIONS_TOTAL
        .with_label_values(&[resource_type, action])
        .inc();
}

/// Render all metrics in the Prometheus text exposition format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod metrics_tests;
