//! Metrics definitions for Token Guard.
//!
//! All metrics follow Prometheus naming conventions:
//! - `guard_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: 4 values (known paths, everything else is `/other`)
//! - `status`: 3 values (success, error, timeout)
//! - `error_type`: bounded by `VerificationError::kind()`
//! - `result`: 2 values (hit, miss)
//!
//! Token contents, kids and subjects are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Verification is in the request path; cached-key verifications are sub-millisecond
        .set_buckets_for_metric(
            Matcher::Full("guard_token_validation_duration_seconds".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        // JWKS fetches are bounded by the fetch timeout (max 60s)
        .set_buckets_for_metric(
            Matcher::Full("guard_jwks_fetch_duration_seconds".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("guard_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a token verification outcome.
///
/// Metric: `guard_token_validations_total`, `guard_token_validation_duration_seconds`
/// Labels: `status`, `error_type`
pub fn record_token_validation(status: &str, error_type: Option<&str>, duration: Duration) {
    let error_type = error_type.unwrap_or("none");

    histogram!("guard_token_validation_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("guard_token_validations_total",
        "status" => status.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record an outbound JWKS fetch.
///
/// Metric: `guard_jwks_fetches_total`, `guard_jwks_fetch_duration_seconds`
/// Labels: `status`
pub fn record_jwks_fetch(status: &str, duration: Duration) {
    histogram!("guard_jwks_fetch_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("guard_jwks_fetches_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a key cache lookup.
///
/// Metric: `guard_jwks_cache_lookups_total`
/// Labels: `result` (hit, miss)
pub fn record_jwks_cache_lookup(result: &str) {
    counter!("guard_jwks_cache_lookups_total",
        "result" => result.to_string()
    )
    .increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `guard_http_requests_total`, `guard_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// This captures ALL HTTP responses, including 401s produced by the
/// authentication middleware and framework-level errors like 404 and 405.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("guard_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("guard_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/api/v1/me" => "/api/v1/me",
        _ => "/other",
    }
}
