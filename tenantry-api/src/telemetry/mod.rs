//! Tenantry Telemetry - Logging and Prometheus Metrics
//!
//! Structured logging through `tracing-subscriber` and the degraded-mode
//! metrics the tenancy layer exposes to operators.

pub mod metrics;
pub mod tracer;

pub use metrics::{metrics_handler, record_decode_failure, record_error, TenancyMetrics, METRICS};
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
