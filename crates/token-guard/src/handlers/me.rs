//! Current identity handler.
//!
//! Returns the verified claims of the caller's token.

use crate::auth::VerifiedIdentity;
use axum::{Extension, Json};
use tracing::instrument;

/// Handler for GET /api/v1/me
///
/// Requires the auth middleware. Returns 200 OK with the token's claims
/// exactly as issued:
///
/// ```json
/// {
///   "sub": "user-42",
///   "iss": "https://auth.example.com",
///   "aud": "token-guard-api",
///   "exp": 1700003600
/// }
/// ```
#[instrument(skip_all, name = "guard.handlers.me")]
pub async fn get_me(Extension(identity): Extension<VerifiedIdentity>) -> Json<VerifiedIdentity> {
    tracing::debug!(target: "guard.handlers.me", "Returning verified claims");
    Json(identity)
}
