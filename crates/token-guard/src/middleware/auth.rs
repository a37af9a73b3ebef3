//! Authentication middleware for protected routes.
//!
//! Reads the `Authorization` header, verifies the bearer token with the
//! shared `TokenVerifier`, and injects the `VerifiedIdentity` into request
//! extensions. Any failure short-circuits with a generic 401.

use crate::auth::{TokenVerifier, VerifiedIdentity};
use crate::errors::VerificationError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Verifier owning the JWKS resolver and key cache.
    pub verifier: Arc<TokenVerifier>,
}

impl AuthState {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier: Arc::new(verifier),
        }
    }
}

/// Authentication middleware that verifies bearer tokens.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - Returns 401 Unauthorized with a `WWW-Authenticate` header if the token is
///   missing or fails any check; the reason is only logged
/// - Continues to the next handler with `VerifiedIdentity` in extensions
#[instrument(skip_all, name = "guard.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, VerificationError> {
    // Owned copy so no borrow of the request is held across the await.
    // A header that is not valid UTF-8 is treated as absent.
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);

    let identity = state
        .verifier
        .verify_header(authorization.as_deref())
        .await
        .map_err(|e| {
            tracing::info!(
                target: "guard.middleware",
                error_kind = e.kind(),
                "Request rejected"
            );
            e
        })?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Extension trait for extracting the verified identity from a request.
pub trait IdentityExt {
    /// Get the verified identity from request extensions.
    ///
    /// Returns `None` if the auth middleware was not applied to this request.
    fn identity(&self) -> Option<&VerifiedIdentity>;
}

impl<B> IdentityExt for axum::http::Request<B> {
    fn identity(&self) -> Option<&VerifiedIdentity> {
        self.extensions().get::<VerifiedIdentity>()
    }
}
