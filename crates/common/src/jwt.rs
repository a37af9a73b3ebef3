//! JWT utilities shared across Token Guard components.
//!
//! This module is the token parser used by the verification engine:
//! - Bearer token extraction from an `Authorization` header value
//! - Size limits for DoS prevention
//! - Structural validation (three base64url segments)
//! - Untrusted decoding of the header and claims segments
//! - Clock skew constants for `exp`/`nbf` validation
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing decoded here is trusted; the signature segment is passed through
//!   untouched for the verifier
//! - Generic error messages prevent information leakage
//! - The `sub` claim is redacted in `TokenClaims` Debug output
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::parse_authorization;
//!
//! let token = parse_authorization(headers.get("authorization"))?;
//! let kid = token.header.kid();
//! // resolve key by kid, then verify token.signing_input() / token.signature()
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any base64 decoding or
/// cryptographic operations.
///
/// - Typical JWTs are 200-1500 bytes (header + claims + signature)
/// - An RS256 token with a handful of claims is ~700 bytes
///
/// Per OWASP API Security Top 10 - API4:2023 (Unrestricted Resource Consumption)
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Literal scheme prefix of a bearer `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Default clock skew tolerance applied to `exp` and `nbf`.
///
/// Zero: a token is expired at the exact second named by `exp`.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::ZERO;

/// Maximum allowed clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration that would keep expired tokens usable for long
/// periods.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while extracting and parsing a bearer token.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// No `Authorization` header, or it does not use the `Bearer ` scheme.
    #[error("The access token is invalid or expired")]
    MissingToken,

    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a structurally valid JWT, or a segment failed to decode.
    #[error("The access token is invalid or expired")]
    MalformedToken,
}

// =============================================================================
// Token Types
// =============================================================================

/// Decoded JOSE header of a token. Untrusted until the signature is verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm as declared by the token (e.g. "RS256", "none").
    pub alg: String,

    /// Key ID naming the JWKS entry that signed the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Media type, usually "JWT".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

impl TokenHeader {
    /// Key ID, treating an empty `kid` the same as an absent one.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref().filter(|kid| !kid.is_empty())
    }
}

/// Decoded claims segment of a token: claim name to JSON value.
///
/// Untrusted until the signature is verified. The `sub` claim carries user or
/// client identifiers and is redacted in Debug output.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenClaims(Map<String, Value>);

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.0 {
            if name == "sub" {
                map.entry(name, &"[REDACTED]");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

impl From<Map<String, Value>> for TokenClaims {
    fn from(claims: Map<String, Value>) -> Self {
        Self(claims)
    }
}

impl TokenClaims {
    /// Raw value of a claim.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// `iss` claim, if present and a string.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.0.get("iss").and_then(Value::as_str)
    }

    /// `sub` claim, if present and a string.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }

    /// `aud` claim as sent: a string or an array of strings.
    #[must_use]
    pub fn audience(&self) -> Option<&Value> {
        self.0.get("aud")
    }

    /// `exp` claim as sent.
    #[must_use]
    pub fn expiry(&self) -> Option<&Value> {
        self.0.get("exp")
    }

    /// `nbf` claim as sent.
    #[must_use]
    pub fn not_before(&self) -> Option<&Value> {
        self.0.get("nbf")
    }

    /// Borrow the full claim map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the full claim map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// A bearer token that passed structural checks and whose header and claims
/// decoded as JSON. Nothing in here is trusted yet.
#[derive(Debug, Clone)]
pub struct ParsedToken<'a> {
    /// Decoded header segment.
    pub header: TokenHeader,

    /// Decoded claims segment.
    pub claims: TokenClaims,

    signing_input: &'a str,
    signature: &'a str,
}

impl<'a> ParsedToken<'a> {
    /// The `header.payload` bytes the signature was computed over.
    #[must_use]
    pub fn signing_input(&self) -> &'a str {
        self.signing_input
    }

    /// The base64url signature segment, without trailing `=` padding.
    #[must_use]
    pub fn signature(&self) -> &'a str {
        self.signature
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Extract the raw token from an `Authorization` header value.
///
/// # Errors
///
/// Returns `JwtValidationError::MissingToken` if the header is absent or does
/// not start with the literal `"Bearer "` prefix.
pub fn extract_bearer(authorization: Option<&str>) -> Result<&str, JwtValidationError> {
    let Some(value) = authorization else {
        tracing::debug!(target: "common.jwt", "Missing Authorization header");
        return Err(JwtValidationError::MissingToken);
    };

    value.strip_prefix(BEARER_PREFIX).ok_or_else(|| {
        tracing::debug!(target: "common.jwt", "Authorization header is not a Bearer token");
        JwtValidationError::MissingToken
    })
}

/// Parse a raw token into its decoded header, decoded claims and the
/// untouched signature segment.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing (denial-of-service prevention)
/// - This function does NOT validate the token signature
/// - The returned header and claims MUST NOT be trusted until verified
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - not exactly three non-empty base64url segments, or the
///   header/claims segments are not base64url-encoded JSON objects
pub fn parse_token(token: &str) -> Result<ParsedToken<'_>, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;
    let (header_part, payload_part) = signing_input
        .split_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;

    // A fourth segment would leave a '.' inside the payload part, which the
    // character check below rejects.
    for segment in [header_part, payload_part, signature] {
        if !is_base64url_segment(segment) {
            tracing::debug!(
                target: "common.jwt",
                segment_len = segment.len(),
                "Token rejected: invalid JWT segment"
            );
            return Err(JwtValidationError::MalformedToken);
        }
    }

    let header: TokenHeader = decode_segment(header_part, "header")?;
    let claims: TokenClaims = decode_segment(payload_part, "claims")?;

    Ok(ParsedToken {
        header,
        claims,
        signing_input,
        signature: signature.trim_end_matches('='),
    })
}

/// Extract and parse a bearer token from an `Authorization` header value.
///
/// # Errors
///
/// See [`extract_bearer`] and [`parse_token`].
pub fn parse_authorization(
    authorization: Option<&str>,
) -> Result<ParsedToken<'_>, JwtValidationError> {
    parse_token(extract_bearer(authorization)?)
}

/// Non-empty base64url alphabet, with `=` allowed only as trailing padding.
fn is_base64url_segment(segment: &str) -> bool {
    let unpadded = segment.trim_end_matches('=');
    !unpadded.is_empty()
        && unpadded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

fn decode_segment<T: DeserializeOwned>(
    segment: &str,
    what: &'static str,
) -> Result<T, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", segment = what, error = %e, "Failed to decode JWT segment base64");
            JwtValidationError::MalformedToken
        })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", segment = what, error = %e, "Failed to parse JWT segment JSON");
        JwtValidationError::MalformedToken
    })
}

// =============================================================================
// Tests
// =============================================================================
