//! Health check handler.

/// Liveness probe handler.
///
/// Returns a simple "OK" response to indicate the process is running. Does
/// not check the JWKS endpoint; key resolution happens on demand.
pub async fn health_check() -> &'static str {
    "OK"
}
