//! Token verification error types.
//!
//! Every variant is terminal for the request that produced it and maps to the
//! same 401 response via the `IntoResponse` impl. The variant itself is only
//! ever logged and used as a metrics label; clients never learn which check
//! failed.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtValidationError;
use serde::Serialize;
use thiserror::Error;

/// Generic message returned to clients for every rejected token.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// `WWW-Authenticate` challenge attached to every 401 response.
pub const WWW_AUTHENTICATE_CHALLENGE: &str =
    "Bearer realm=\"token-guard\", error=\"invalid_token\"";

/// Why a bearer token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Signing key not found")]
    KeyNotFound,

    #[error("Signing key resolution failed: {0}")]
    KeyResolution(String),

    #[error("Signing key conversion failed: {0}")]
    KeyConversion(String),

    #[error("Token algorithm rejected")]
    AlgorithmRejected,

    #[error("Token signature invalid")]
    SignatureInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token not yet valid")]
    TokenNotYetValid,

    #[error("Token issuer mismatch")]
    IssuerMismatch,

    #[error("Token audience mismatch")]
    AudienceMismatch,
}

impl VerificationError {
    /// Bounded label for logs and the `error_type` metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            VerificationError::MissingToken => "missing_token",
            VerificationError::MalformedToken => "malformed_token",
            VerificationError::KeyNotFound => "key_not_found",
            VerificationError::KeyResolution(_) => "key_resolution",
            VerificationError::KeyConversion(_) => "key_conversion",
            VerificationError::AlgorithmRejected => "algorithm_rejected",
            VerificationError::SignatureInvalid => "signature_invalid",
            VerificationError::TokenExpired => "token_expired",
            VerificationError::TokenNotYetValid => "token_not_yet_valid",
            VerificationError::IssuerMismatch => "issuer_mismatch",
            VerificationError::AudienceMismatch => "audience_mismatch",
        }
    }
}

impl From<JwtValidationError> for VerificationError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::MissingToken => VerificationError::MissingToken,
            // Oversized tokens are treated as malformed
            JwtValidationError::TokenTooLarge | JwtValidationError::MalformedToken => {
                VerificationError::MalformedToken
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: &'static str,
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        tracing::debug!(
            target: "guard.errors",
            error_kind = self.kind(),
            error = %self,
            "Rejecting request as unauthorized"
        );

        let body = ErrorResponse {
            error: ErrorDetail {
                code: "INVALID_TOKEN",
                message: INVALID_TOKEN_MESSAGE,
            },
        };

        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response.headers_mut().insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static(WWW_AUTHENTICATE_CHALLENGE),
        );
        response
    }
}
