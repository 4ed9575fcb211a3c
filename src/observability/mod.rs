//! # Observability
//!
//! Prometheus metrics for harness runs. Logging goes through `tracing`
//! directly; subscribers are installed by binaries.

pub mod metrics;
