//! # Metrics
//!
//! Prometheus metrics for harness runs.
//!
//! ## Metrics Exposed
//!
//! - `rr_harness_route_reflectors_started_total` - Route reflector containers launched
//! - `rr_harness_registrations_total` - Registrations written to etcd, by transport
//! - `rr_harness_cleanups_total` - Route reflector hosts cleaned up
//! - `rr_harness_cleanup_failures_total` - Host cleanups that failed during teardown

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static ROUTE_REFLECTORS_STARTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rr_harness_route_reflectors_started_total",
        "Total number of route reflector containers launched",
    )
    .expect("Failed to create ROUTE_REFLECTORS_STARTED_TOTAL metric - this should never happen")
});

static REGISTRATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "rr_harness_registrations_total",
            "Total number of route reflector registrations written to etcd",
        ),
        &["transport"],
    )
    .expect("Failed to create REGISTRATIONS_TOTAL metric - this should never happen")
});

static CLEANUPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rr_harness_cleanups_total",
        "Total number of route reflector hosts cleaned up",
    )
    .expect("Failed to create CLEANUPS_TOTAL metric - this should never happen")
});

static CLEANUP_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rr_harness_cleanup_failures_total",
        "Total number of route reflector host cleanups that failed during teardown",
    )
    .expect("Failed to create CLEANUP_FAILURES_TOTAL metric - this should never happen")
});

/// Register all metrics with the registry
///
/// Fails if called twice, like any duplicate Prometheus registration.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ROUTE_REFLECTORS_STARTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REGISTRATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CLEANUPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CLEANUP_FAILURES_TOTAL.clone()))?;
    Ok(())
}

/// Render the registry in the Prometheus text exposition format
pub fn gather_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn increment_route_reflectors_started() {
    ROUTE_REFLECTORS_STARTED_TOTAL.inc();
}

pub fn increment_registrations(transport: &str) {
    REGISTRATIONS_TOTAL.with_label_values(&[transport]).inc();
}

pub fn increment_cleanups() {
    CLEANUPS_TOTAL.inc();
}

pub fn increment_cleanup_failures() {
    CLEANUP_FAILURES_TOTAL.inc();
}
