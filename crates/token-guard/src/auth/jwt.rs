//! Token verification.
//!
//! Verifies bearer tokens against keys resolved from the issuer's JWKS.
//!
//! # Security Checks (in order)
//!
//! 1. Structural parse with size limit (`common::jwt`)
//! 2. Algorithm check: `none` and anything outside the configured set are
//!    rejected before any key lookup or cryptography
//! 3. Key resolution by `kid`
//! 4. Key/algorithm agreement, then signature over `header.payload`
//! 5. `exp`, `nbf`, `iss`, `aud`, in that order, only after the signature
//!    has been verified

use crate::auth::identity::VerifiedIdentity;
use crate::auth::jwks::JwksKeyResolver;
use crate::auth::keys::SigningKey;
use crate::config::{Config, VerificationConfig};
use crate::errors::VerificationError;
use crate::observability::metrics;
use common::jwt::{parse_authorization, parse_token, ParsedToken, TokenClaims};
use jsonwebtoken::{crypto, Algorithm};
use serde_json::Value;
use std::str::FromStr;
use std::time::Instant;
use tracing::instrument;

/// Choose the verification algorithm for a token's declared `alg`.
///
/// The returned algorithm is always one of `allowed`.
///
/// # Errors
///
/// Returns `AlgorithmRejected` if `alg` is `none` (any case), unknown, or not
/// in `allowed`.
pub fn select_algorithm(alg: &str, allowed: &[Algorithm]) -> Result<Algorithm, VerificationError> {
    if alg.eq_ignore_ascii_case("none") {
        tracing::warn!(target: "guard.verifier", "Token with alg 'none' rejected");
        return Err(VerificationError::AlgorithmRejected);
    }

    let algorithm = Algorithm::from_str(alg).map_err(|_| {
        tracing::debug!(target: "guard.verifier", "Token with unknown alg rejected");
        VerificationError::AlgorithmRejected
    })?;

    if !allowed.contains(&algorithm) {
        tracing::debug!(target: "guard.verifier", algorithm = ?algorithm, "Token alg not allowed");
        return Err(VerificationError::AlgorithmRejected);
    }

    Ok(algorithm)
}

/// Verify the token's signature with `key` using `algorithm`.
///
/// # Errors
///
/// - `AlgorithmRejected` - the key cannot be used with `algorithm`
/// - `SignatureInvalid` - the signature does not verify
pub fn verify_signature(
    token: &ParsedToken<'_>,
    key: &SigningKey,
    algorithm: Algorithm,
) -> Result<(), VerificationError> {
    key.check_algorithm(algorithm)?;

    match crypto::verify(
        token.signature(),
        token.signing_input().as_bytes(),
        key.decoding_key(),
        algorithm,
    ) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::debug!(target: "guard.verifier", kid = %key.kid(), "Signature mismatch");
            Err(VerificationError::SignatureInvalid)
        }
        Err(e) => {
            tracing::debug!(target: "guard.verifier", kid = %key.kid(), error = %e, "Signature verification failed");
            Err(VerificationError::SignatureInvalid)
        }
    }
}

/// Validate `exp`, `nbf`, `iss` and `aud` against `config` at the current time.
///
/// # Errors
///
/// See [`validate_claims_at`].
pub fn validate_claims(
    claims: &TokenClaims,
    config: &VerificationConfig,
) -> Result<(), VerificationError> {
    validate_claims_at(claims, config, chrono::Utc::now().timestamp())
}

/// Validate `exp`, `nbf`, `iss` and `aud` against `config` as of `now`
/// (Unix seconds). Pure; exposed for deterministic testing.
///
/// # Errors
///
/// - `TokenExpired` - `exp` missing, not a number, or `now >= exp + leeway`
/// - `TokenNotYetValid` - `nbf` present and not a number, or `now + leeway < nbf`
/// - `IssuerMismatch` - `iss` missing or not exactly the configured issuer
/// - `AudienceMismatch` - `aud` missing, or neither equal to nor an array
///   containing the configured audience
pub fn validate_claims_at(
    claims: &TokenClaims,
    config: &VerificationConfig,
    now: i64,
) -> Result<(), VerificationError> {
    let now = now as f64;
    let leeway = config.leeway().as_secs_f64();

    match claims.expiry().and_then(Value::as_f64) {
        Some(exp) if now < exp + leeway => {}
        Some(_) => {
            tracing::debug!(target: "guard.verifier", "Token expired");
            return Err(VerificationError::TokenExpired);
        }
        None => {
            tracing::debug!(target: "guard.verifier", "Token has no numeric exp");
            return Err(VerificationError::TokenExpired);
        }
    }

    if let Some(nbf) = claims.not_before() {
        match nbf.as_f64() {
            Some(nbf) if now + leeway >= nbf => {}
            _ => {
                tracing::debug!(target: "guard.verifier", "Token not yet valid");
                return Err(VerificationError::TokenNotYetValid);
            }
        }
    }

    if claims.issuer() != Some(config.issuer()) {
        tracing::debug!(target: "guard.verifier", "Token issuer mismatch");
        return Err(VerificationError::IssuerMismatch);
    }

    let audience = config.audience();
    let audience_ok = match claims.audience() {
        Some(Value::String(aud)) => aud == audience,
        Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(audience)),
        _ => false,
    };
    if !audience_ok {
        tracing::debug!(target: "guard.verifier", "Token audience mismatch");
        return Err(VerificationError::AudienceMismatch);
    }

    Ok(())
}

/// Verifies bearer tokens for one issuer/audience pair.
///
/// Owns the JWKS resolver and, through it, the key cache; share one instance
/// (behind an `Arc`) across all requests.
pub struct TokenVerifier {
    config: VerificationConfig,
    resolver: JwksKeyResolver,
}

impl TokenVerifier {
    pub fn new(config: VerificationConfig, resolver: JwksKeyResolver) -> Self {
        Self { config, resolver }
    }

    /// Build a verifier and its resolver from service configuration.
    pub fn from_config(config: &Config) -> Self {
        let resolver = JwksKeyResolver::new(
            config.verification.issuer(),
            config.jwks_cache_ttl(),
            config.jwks_fetch_timeout(),
        );
        Self::new(config.verification.clone(), resolver)
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub fn resolver(&self) -> &JwksKeyResolver {
        &self.resolver
    }

    /// Verify the bearer token in an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Any `VerificationError`; see the module docs for the order of checks.
    #[instrument(skip_all)]
    pub async fn verify_header(
        &self,
        authorization: Option<&str>,
    ) -> Result<VerifiedIdentity, VerificationError> {
        let start = Instant::now();
        let result = match parse_authorization(authorization) {
            Ok(token) => self.verify_parsed(token).await,
            Err(e) => Err(e.into()),
        };
        record_outcome(&result, start);
        result
    }

    /// Verify a raw token (without the `Bearer ` prefix).
    ///
    /// # Errors
    ///
    /// Same as [`TokenVerifier::verify_header`], except `MissingToken`.
    #[instrument(skip_all)]
    pub async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, VerificationError> {
        let start = Instant::now();
        let result = match parse_token(token) {
            Ok(token) => self.verify_parsed(token).await,
            Err(e) => Err(e.into()),
        };
        record_outcome(&result, start);
        result
    }

    async fn verify_parsed(
        &self,
        token: ParsedToken<'_>,
    ) -> Result<VerifiedIdentity, VerificationError> {
        let algorithm = select_algorithm(&token.header.alg, self.config.allowed_algorithms())?;

        let kid = token.header.kid().ok_or_else(|| {
            tracing::debug!(target: "guard.verifier", "Token has no kid");
            VerificationError::KeyNotFound
        })?;

        let key = self.resolver.resolve(kid).await?;

        verify_signature(&token, &key, algorithm)?;
        validate_claims(&token.claims, &self.config)?;

        tracing::debug!(target: "guard.verifier", kid = %kid, "Token verified");
        Ok(VerifiedIdentity::new(token.claims))
    }
}

fn record_outcome(result: &Result<VerifiedIdentity, VerificationError>, start: Instant) {
    match result {
        Ok(_) => metrics::record_token_validation("success", None, start.elapsed()),
        Err(e) => metrics::record_token_validation("error", Some(e.kind()), start.elapsed()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::keys::KeyFamily;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use jsonwebtoken::DecodingKey;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;
    const ISSUER: &str = "https://auth.example.com";
    const AUDIENCE: &str = "token-guard-api";

    fn config() -> VerificationConfig {
        VerificationConfig::new(ISSUER, AUDIENCE, [Algorithm::RS256, Algorithm::EdDSA]).unwrap()
    }

    fn claims(json: serde_json::Value) -> TokenClaims {
        serde_json::from_value(json).unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        serde_json::json!({
            "sub": "user-1",
            "iss": ISSUER,
            "aud": AUDIENCE,
            "exp": NOW + 3600,
            "iat": NOW,
        })
    }

    fn with(mut base: serde_json::Value, name: &str, value: serde_json::Value) -> TokenClaims {
        base.as_object_mut().unwrap().insert(name.to_string(), value);
        claims(base)
    }

    fn without(mut base: serde_json::Value, name: &str) -> TokenClaims {
        base.as_object_mut().unwrap().remove(name);
        claims(base)
    }

    // -------------------------------------------------------------------------
    // select_algorithm
    // -------------------------------------------------------------------------

    #[test]
    fn test_select_algorithm_allowed() {
        let allowed = [Algorithm::RS256, Algorithm::ES256];
        assert_eq!(select_algorithm("RS256", &allowed), Ok(Algorithm::RS256));
        assert_eq!(select_algorithm("ES256", &allowed), Ok(Algorithm::ES256));
    }

    #[test]
    fn test_select_algorithm_rejects_none_any_case() {
        let allowed = [Algorithm::RS256];
        for alg in ["none", "None", "NONE", "nOnE"] {
            assert_eq!(
                select_algorithm(alg, &allowed),
                Err(VerificationError::AlgorithmRejected),
                "{alg}"
            );
        }
    }

    #[test]
    fn test_select_algorithm_rejects_outside_set() {
        let allowed = [Algorithm::RS256];
        assert_eq!(
            select_algorithm("HS256", &allowed),
            Err(VerificationError::AlgorithmRejected)
        );
        assert_eq!(
            select_algorithm("ES256", &allowed),
            Err(VerificationError::AlgorithmRejected)
        );
        assert_eq!(
            select_algorithm("rs256", &allowed),
            Err(VerificationError::AlgorithmRejected)
        );
        assert_eq!(
            select_algorithm("", &allowed),
            Err(VerificationError::AlgorithmRejected)
        );
    }

    // -------------------------------------------------------------------------
    // verify_signature
    // -------------------------------------------------------------------------

    #[test]
    fn test_verify_signature_rejects_family_mismatch_before_crypto() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"ed"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"x"}"#);
        let token_str = format!("{header}.{payload}.c2lnbmF0dXJl");
        let token = parse_token(&token_str).unwrap();

        let key = SigningKey::new(
            "ed",
            KeyFamily::Ed25519,
            None,
            DecodingKey::from_ed_components("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap(),
        );

        assert_eq!(
            verify_signature(&token, &key, Algorithm::RS256),
            Err(VerificationError::AlgorithmRejected)
        );
    }

    #[test]
    fn test_verify_signature_garbage_signature() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"EdDSA","kid":"ed"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"x"}"#);
        let token_str = format!("{header}.{payload}.c2lnbmF0dXJl");
        let token = parse_token(&token_str).unwrap();

        let key = SigningKey::new(
            "ed",
            KeyFamily::Ed25519,
            None,
            DecodingKey::from_ed_components("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap(),
        );

        assert_eq!(
            verify_signature(&token, &key, Algorithm::EdDSA),
            Err(VerificationError::SignatureInvalid)
        );
    }

    // -------------------------------------------------------------------------
    // validate_claims_at
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_claims_success() {
        assert!(validate_claims_at(&claims(valid_claims()), &config(), NOW).is_ok());
    }

    #[test]
    fn test_exp_boundary() {
        let exp_now = with(valid_claims(), "exp", serde_json::json!(NOW));
        assert_eq!(
            validate_claims_at(&exp_now, &config(), NOW),
            Err(VerificationError::TokenExpired),
            "now == exp is expired"
        );

        let exp_past = with(valid_claims(), "exp", serde_json::json!(NOW - 10));
        assert_eq!(
            validate_claims_at(&exp_past, &config(), NOW),
            Err(VerificationError::TokenExpired)
        );

        let exp_next = with(valid_claims(), "exp", serde_json::json!(NOW + 1));
        assert!(validate_claims_at(&exp_next, &config(), NOW).is_ok());
    }

    #[test]
    fn test_exp_fractional_seconds() {
        let exp = with(valid_claims(), "exp", serde_json::json!(NOW as f64 + 0.5));
        assert!(validate_claims_at(&exp, &config(), NOW).is_ok());
    }

    #[test]
    fn test_exp_missing_or_non_numeric() {
        assert_eq!(
            validate_claims_at(&without(valid_claims(), "exp"), &config(), NOW),
            Err(VerificationError::TokenExpired)
        );
        assert_eq!(
            validate_claims_at(
                &with(valid_claims(), "exp", serde_json::json!("9999999999")),
                &config(),
                NOW
            ),
            Err(VerificationError::TokenExpired)
        );
    }

    #[test]
    fn test_exp_leeway() {
        let config = config().with_leeway(Duration::from_secs(30)).unwrap();
        let exp = with(valid_claims(), "exp", serde_json::json!(NOW - 10));
        assert!(validate_claims_at(&exp, &config, NOW).is_ok());

        let exp = with(valid_claims(), "exp", serde_json::json!(NOW - 30));
        assert_eq!(
            validate_claims_at(&exp, &config, NOW),
            Err(VerificationError::TokenExpired)
        );
    }

    #[test]
    fn test_nbf() {
        let nbf_future = with(valid_claims(), "nbf", serde_json::json!(NOW + 60));
        assert_eq!(
            validate_claims_at(&nbf_future, &config(), NOW),
            Err(VerificationError::TokenNotYetValid)
        );

        let nbf_now = with(valid_claims(), "nbf", serde_json::json!(NOW));
        assert!(validate_claims_at(&nbf_now, &config(), NOW).is_ok());

        let nbf_bad = with(valid_claims(), "nbf", serde_json::json!("soon"));
        assert_eq!(
            validate_claims_at(&nbf_bad, &config(), NOW),
            Err(VerificationError::TokenNotYetValid)
        );

        let config = config().with_leeway(Duration::from_secs(60)).unwrap();
        assert!(validate_claims_at(&nbf_future, &config, NOW).is_ok());
    }

    #[test]
    fn test_issuer_exact_match() {
        for iss in [
            serde_json::json!("nottheissuer"),
            serde_json::json!("https://auth.example.com/"),
            serde_json::json!("HTTPS://AUTH.EXAMPLE.COM"),
            serde_json::json!([ISSUER]),
        ] {
            assert_eq!(
                validate_claims_at(&with(valid_claims(), "iss", iss.clone()), &config(), NOW),
                Err(VerificationError::IssuerMismatch),
                "{iss}"
            );
        }

        assert_eq!(
            validate_claims_at(&without(valid_claims(), "iss"), &config(), NOW),
            Err(VerificationError::IssuerMismatch)
        );
    }

    #[test]
    fn test_audience_string_and_array() {
        let single = with(valid_claims(), "aud", serde_json::json!(AUDIENCE));
        assert!(validate_claims_at(&single, &config(), NOW).is_ok());

        let array = with(
            valid_claims(),
            "aud",
            serde_json::json!(["other-api", AUDIENCE]),
        );
        assert!(validate_claims_at(&array, &config(), NOW).is_ok());
    }

    #[test]
    fn test_audience_mismatch() {
        for aud in [
            serde_json::json!("anotheraudience"),
            serde_json::json!(["a", "b"]),
            serde_json::json!([]),
            serde_json::json!(42),
            serde_json::json!(null),
        ] {
            assert_eq!(
                validate_claims_at(&with(valid_claims(), "aud", aud.clone()), &config(), NOW),
                Err(VerificationError::AudienceMismatch),
                "{aud}"
            );
        }

        assert_eq!(
            validate_claims_at(&without(valid_claims(), "aud"), &config(), NOW),
            Err(VerificationError::AudienceMismatch)
        );
    }

    #[test]
    fn test_claims_checked_in_order() {
        // Expired and wrong audience: expiry wins
        let mut base = valid_claims();
        base["exp"] = serde_json::json!(NOW - 1);
        base["aud"] = serde_json::json!("anotheraudience");
        assert_eq!(
            validate_claims_at(&claims(base), &config(), NOW),
            Err(VerificationError::TokenExpired)
        );

        // Wrong issuer and wrong audience: issuer wins
        let mut base = valid_claims();
        base["iss"] = serde_json::json!("nottheissuer");
        base["aud"] = serde_json::json!("anotheraudience");
        assert_eq!(
            validate_claims_at(&claims(base), &config(), NOW),
            Err(VerificationError::IssuerMismatch)
        );
    }

    // -------------------------------------------------------------------------
    // TokenVerifier (paths that never reach the network)
    // -------------------------------------------------------------------------

    fn offline_verifier() -> TokenVerifier {
        // Nothing listens here; any fetch attempt would fail with KeyResolution
        let resolver = JwksKeyResolver::new(
            "http://127.0.0.1:9",
            Duration::from_secs(60),
            Duration::from_secs(1),
        );
        TokenVerifier::new(config(), resolver)
    }

    #[tokio::test]
    async fn test_verifier_missing_and_malformed() {
        let verifier = offline_verifier();

        assert_eq!(
            verifier.verify_header(None).await.unwrap_err(),
            VerificationError::MissingToken
        );
        assert_eq!(
            verifier.verify_header(Some("Basic abc")).await.unwrap_err(),
            VerificationError::MissingToken
        );
        assert_eq!(
            verifier
                .verify_header(Some("Bearer thisisnotavalidtoken"))
                .await
                .unwrap_err(),
            VerificationError::MalformedToken
        );
    }

    #[tokio::test]
    async fn test_verifier_rejects_alg_none_before_resolution() {
        let verifier = offline_verifier();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","kid":"k1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(valid_claims().to_string());
        let token = format!("{header}.{payload}.c2ln");

        assert_eq!(
            verifier.verify_token(&token).await.unwrap_err(),
            VerificationError::AlgorithmRejected
        );
        assert!(verifier.resolver().cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_verifier_missing_kid_is_key_not_found() {
        let verifier = offline_verifier();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(valid_claims().to_string());
        let token = format!("{header}.{payload}.c2ln");

        assert_eq!(
            verifier.verify_token(&token).await.unwrap_err(),
            VerificationError::KeyNotFound
        );
    }

    #[tokio::test]
    async fn test_verifier_unreachable_jwks_fails_closed() {
        let verifier = offline_verifier();
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"k1"}"#);
        let payload = URL_SAFE_NO_PAD.encode(valid_claims().to_string());
        let token = format!("{header}.{payload}.c2ln");

        assert!(matches!(
            verifier.verify_token(&token).await,
            Err(VerificationError::KeyResolution(_))
        ));
    }
}
