//! Prometheus Metrics Definitions
//!
//! Counters for tenancy failures by family and a gauge mirroring the
//! index engine's fallback-scan counter. A non-zero fallback gauge means an
//! index function is failing and listers are scanning the whole cache.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use tenantry_core::{PolicyError, TenancyError};

use crate::error::{ApiError, ApiResult};

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<TenancyMetrics>> = Lazy::new(TenancyMetrics::new);

#[derive(Clone)]
pub struct TenancyMetrics {
    /// Credential decode failures - labels: boundary
    pub decode_failures_total: CounterVec,

    /// Policy rejections - labels: reason
    pub policy_rejections_total: CounterVec,

    /// Operations refused for lack of a tenant
    pub scope_violations_total: Counter,

    /// Linear scans taken because an index was unusable
    pub index_fallback_scans: Gauge,
}

impl TenancyMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            decode_failures_total: register_counter_vec!(
                "tenantry_decode_failures_total",
                "Credentials rejected for missing or malformed tenant info",
                &["boundary"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register decode_failures_total: {}", e)))?,

            policy_rejections_total: register_counter_vec!(
                "tenantry_policy_rejections_total",
                "Requests rejected by tenancy policy",
                &["reason"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register policy_rejections_total: {}", e)))?,

            scope_violations_total: register_counter!(
                "tenantry_scope_violations_total",
                "Tenant-scoped operations attempted without a tenant"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register scope_violations_total: {}", e)))?,

            index_fallback_scans: register_gauge!(
                "tenantry_index_fallback_scans",
                "Linear cache scans taken because a tenant index failed"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register index_fallback_scans: {}", e)))?,
        })
    }

    /// Count `err` against its failure family. Other families are ignored.
    pub fn record_error(&self, boundary: &str, err: &TenancyError) {
        match err {
            TenancyError::Decode(_) => self
                .decode_failures_total
                .with_label_values(&[boundary])
                .inc(),
            TenancyError::Scope(_) => self.scope_violations_total.inc(),
            TenancyError::Policy(policy) => {
                let reason = match policy {
                    PolicyError::AdminPointOperation { .. } => "admin_point_operation",
                    PolicyError::ResourceNotAllowed { .. } => "resource_not_allowed",
                    PolicyError::ReservedAnnotation { .. } => "reserved_annotation",
                };
                self.policy_rejections_total.with_label_values(&[reason]).inc();
            }
            _ => {}
        }
    }

    /// Copy the index engine's fallback counter into the gauge.
    pub fn sync_fallback_scans(&self) {
        self.index_fallback_scans
            .set(tenantry_storage::fallback_scan_count() as f64);
    }
}

/// Record `err` on the global registry, if it initialized.
pub fn record_error(boundary: &str, err: &TenancyError) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_error(boundary, err);
    }
}

/// Count a decode failure already converted to an API error.
pub fn record_decode_failure(boundary: &str) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.decode_failures_total.with_label_values(&[boundary]).inc();
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.sync_fallback_scans();
    }
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
