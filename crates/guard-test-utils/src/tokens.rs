//! Claim builders and hand-assembled tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde_json::{json, Value};

/// Audience used by `test_config`.
pub const TEST_AUDIENCE: &str = "token-guard-api";

/// Subject used by `valid_claims`.
pub const TEST_SUBJECT: &str = "user-1234";

/// Claims that pass validation against `issuer`/`audience` for the next hour.
pub fn valid_claims(issuer: &str, audience: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "sub": TEST_SUBJECT,
        "iss": issuer,
        "aud": audience,
        "iat": now,
        "exp": now + 3600,
        "scope": "profile:read"
    })
}

/// `valid_claims` with `exp` moved `seconds_ago` into the past.
pub fn expired_claims(issuer: &str, audience: &str, seconds_ago: i64) -> Value {
    let mut claims = valid_claims(issuer, audience);
    claims["exp"] = json!(Utc::now().timestamp() - seconds_ago);
    claims
}

/// Assemble a compact token from raw parts without signing.
///
/// `signature` is base64url-encoded as given, so tokens claiming `alg: none`
/// or carrying a forged signature can be built.
pub fn forged_token(header: &Value, claims: &Value, signature: &[u8]) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(signature)
    )
}

/// Replace the payload of a signed token, keeping its header and signature.
pub fn tamper_payload(token: &str, claims: &Value) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3, "expected a compact JWS");
    format!(
        "{}.{}.{}",
        parts[0],
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        parts[2]
    )
}
