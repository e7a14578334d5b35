//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging through `tracing`
//! - Prometheus metrics for buffering and flush outcomes
//! - HTTP endpoints for Prometheus scraping

pub mod metrics;
pub mod prometheus;
pub mod tracing;
