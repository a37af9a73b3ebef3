//! JWKS key resolution integration tests.
//!
//! Exercises fetching, caching, rotation, single-flight and failure handling
//! of `JwksKeyResolver` against a mocked JWKS endpoint.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::Result;
use guard_test_utils::*;
use jsonwebtoken::Algorithm;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use token_guard::auth::{JwksKeyResolver, KeyFamily, TokenVerifier};
use token_guard::config::VerificationConfig;
use token_guard::errors::VerificationError;

fn resolver_for(jwks: &MockJwks, cache_ttl: Duration, fetch_timeout: Duration) -> JwksKeyResolver {
    JwksKeyResolver::new(&jwks.issuer(), cache_ttl, fetch_timeout)
}

fn default_resolver(jwks: &MockJwks) -> JwksKeyResolver {
    resolver_for(jwks, Duration::from_secs(300), Duration::from_secs(2))
}

fn verifier(jwks: &MockJwks, resolver: JwksKeyResolver) -> TokenVerifier {
    let config = VerificationConfig::new(
        jwks.issuer(),
        TEST_AUDIENCE,
        [Algorithm::RS256, Algorithm::ES256, Algorithm::EdDSA],
    )
    .unwrap();
    TokenVerifier::new(config, resolver)
}

fn assert_key_resolution(result: Result<impl std::fmt::Debug, VerificationError>) {
    match result {
        Err(VerificationError::KeyResolution(_)) => {}
        other => panic!("expected KeyResolution, got {other:?}"),
    }
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_resolves_key_by_kid() -> Result<()> {
    let jwks = MockJwks::start().await;
    let rsa = TestRsaKey::new("rsa-01");
    let ed = TestEdKey::new(1, "ed-01");
    jwks.mount_keys(&[rsa.jwk(), ed.jwk()]).await;

    let resolver = default_resolver(&jwks);

    let key = resolver.resolve("ed-01").await?;
    assert_eq!(key.kid(), "ed-01");
    assert_eq!(key.family(), KeyFamily::Ed25519);

    // Both keys were cached by the single fetch
    assert_eq!(resolver.cache().len().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_is_key_not_found() {
    let jwks = MockJwks::start().await;
    jwks.mount_keys(&[TestRsaKey::new("rsa-01").jwk()]).await;

    let result = default_resolver(&jwks).resolve("missing").await;

    assert_eq!(result.unwrap_err(), VerificationError::KeyNotFound);
}

#[tokio::test]
async fn test_token_without_kid_is_key_not_found_without_fetch() {
    let jwks = MockJwks::start().await;
    let key = TestRsaKey::new("rsa-01");
    jwks.mount_keys_expect(&[key.jwk()], 0).await;

    let mut header = key.header();
    header.kid = None;
    let token = key.sign_with_header(&header, &valid_claims(&jwks.issuer(), TEST_AUDIENCE));

    let result = verifier(&jwks, default_resolver(&jwks))
        .verify_token(&token)
        .await;

    assert_eq!(result.unwrap_err(), VerificationError::KeyNotFound);
    jwks.verify().await;
}

#[tokio::test]
async fn test_symmetric_key_is_conversion_error() {
    let jwks = MockJwks::start().await;
    jwks.mount_keys(&[json!({"kty": "oct", "kid": "shared", "k": "c2VjcmV0"})])
        .await;

    let result = default_resolver(&jwks).resolve("shared").await;

    match result {
        Err(VerificationError::KeyConversion(_)) => {}
        other => panic!("expected KeyConversion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_one_bad_key_does_not_poison_the_set() -> Result<()> {
    let jwks = MockJwks::start().await;
    let good = TestEcKey::p256("ec-01");
    jwks.mount_keys(&[
        json!({"kty": "RSA", "kid": "broken", "n": "", "e": "AQAB"}),
        good.jwk(),
    ])
    .await;

    let resolver = default_resolver(&jwks);

    assert_eq!(resolver.resolve("ec-01").await?.family(), KeyFamily::EcP256);
    assert!(matches!(
        resolver.resolve("broken").await,
        Err(VerificationError::KeyConversion(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_non_2xx_is_key_resolution_error() {
    let jwks = MockJwks::start().await;
    jwks.mount_status(500).await;

    assert_key_resolution(default_resolver(&jwks).resolve("any").await);
}

#[tokio::test]
async fn test_malformed_body_is_key_resolution_error() {
    let jwks = MockJwks::start().await;
    jwks.mount_raw_body("{\"not_keys\": true").await;

    assert_key_resolution(default_resolver(&jwks).resolve("any").await);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_key_resolution_error() {
    // Port 9 (discard) is not listening
    let resolver = JwksKeyResolver::new(
        "http://127.0.0.1:9",
        Duration::from_secs(300),
        Duration::from_secs(1),
    );

    assert_key_resolution(resolver.resolve("any").await);
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let jwks = MockJwks::start().await;
    jwks.mount_delayed(
        &[TestRsaKey::new("rsa-01").jwk()],
        Duration::from_secs(2),
        1,
    )
    .await;

    let resolver = resolver_for(&jwks, Duration::from_secs(300), Duration::from_millis(200));
    let started = std::time::Instant::now();

    let result = resolver.resolve("rsa-01").await;

    assert_eq!(
        result.unwrap_err(),
        VerificationError::KeyResolution("JWKS fetch timed out".to_string())
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_failed_fetch_is_not_remembered() -> Result<()> {
    let jwks = MockJwks::start().await;
    jwks.mount_status(503).await;
    let resolver = default_resolver(&jwks);

    assert_key_resolution(resolver.resolve("rsa-01").await);

    jwks.reset().await;
    jwks.mount_keys(&[TestRsaKey::new("rsa-01").jwk()]).await;

    assert_eq!(resolver.resolve("rsa-01").await?.kid(), "rsa-01");
    Ok(())
}

// ============================================================================
// Caching and rotation
// ============================================================================

#[tokio::test]
async fn test_cached_key_is_reused_within_ttl() -> Result<()> {
    let jwks = MockJwks::start().await;
    let key = TestRsaKey::new("rsa-01");
    jwks.mount_keys_expect(&[key.jwk()], 1).await;

    let verifier = verifier(&jwks, default_resolver(&jwks));
    for _ in 0..5 {
        verifier
            .verify_token(&key.sign(&valid_claims(&jwks.issuer(), TEST_AUDIENCE)))
            .await?;
    }

    jwks.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_expired_entry_is_refetched() -> Result<()> {
    let jwks = MockJwks::start().await;
    let key = TestEdKey::new(4, "ed-04");
    jwks.mount_keys(&[key.jwk()]).await;

    let resolver = resolver_for(&jwks, Duration::from_millis(300), Duration::from_secs(2));

    resolver.resolve("ed-04").await?;
    resolver.resolve("ed-04").await?;
    assert_eq!(jwks.request_count().await, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;

    resolver.resolve("ed-04").await?;
    assert_eq!(jwks.request_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_rotated_in_key_is_fetched_on_miss() -> Result<()> {
    let jwks = MockJwks::start().await;
    let old = TestRsaKey::new("rsa-01");
    let new = TestEcKey::p256("ec-02");
    jwks.mount_keys(&[old.jwk()]).await;

    let verifier = verifier(&jwks, default_resolver(&jwks));
    let claims = valid_claims(&jwks.issuer(), TEST_AUDIENCE);

    verifier.verify_token(&old.sign(&claims)).await?;

    // Issuer rotates: old key removed, new key published
    jwks.reset().await;
    jwks.mount_keys(&[new.jwk()]).await;

    verifier.verify_token(&new.sign(&claims)).await?;
    assert_eq!(jwks.request_count().await, 1);

    // The retired key stays usable until its own entry expires
    verifier.verify_token(&old.sign(&claims)).await?;
    assert_eq!(jwks.request_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_resolve_fresh_bypasses_the_cache() -> Result<()> {
    let jwks = MockJwks::start().await;
    jwks.mount_keys(&[TestRsaKey::new("shared-kid").jwk()]).await;

    let resolver = default_resolver(&jwks);
    assert_eq!(resolver.resolve("shared-kid").await?.family(), KeyFamily::Rsa);

    // Same kid now names an Ed25519 key
    jwks.reset().await;
    jwks.mount_keys(&[TestEdKey::new(5, "shared-kid").jwk()]).await;

    assert_eq!(resolver.resolve("shared-kid").await?.family(), KeyFamily::Rsa);
    assert_eq!(
        resolver.resolve_fresh("shared-kid").await?.family(),
        KeyFamily::Ed25519
    );
    assert_eq!(resolver.resolve("shared-kid").await?.family(), KeyFamily::Ed25519);
    Ok(())
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_fetch() -> Result<()> {
    let jwks = MockJwks::start().await;
    let key = TestEdKey::new(6, "ed-06");
    jwks.mount_delayed(&[key.jwk()], Duration::from_millis(300), 1)
        .await;

    let verifier = Arc::new(verifier(&jwks, default_resolver(&jwks)));
    let token = key.sign(&valid_claims(&jwks.issuer(), TEST_AUDIENCE));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let verifier = Arc::clone(&verifier);
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            verifier.verify_token(&token).await
        }));
    }

    for handle in handles {
        let identity = handle.await??;
        assert_eq!(identity.subject(), Some(TEST_SUBJECT));
    }

    jwks.verify().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_share_one_failure() {
    let jwks = MockJwks::start().await;
    jwks.mount_delayed(&[], Duration::from_millis(200), 1).await;

    let resolver = Arc::new(default_resolver(&jwks));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = Arc::clone(&resolver);
        handles.push(tokio::spawn(async move { resolver.resolve("absent").await }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(result.unwrap_err(), VerificationError::KeyNotFound);
    }

    jwks.verify().await;
}

#[tokio::test]
async fn test_abandoned_request_still_populates_cache() -> Result<()> {
    let jwks = MockJwks::start().await;
    let key = TestRsaKey::new("rsa-01");
    jwks.mount_delayed(&[key.jwk()], Duration::from_millis(300), 1)
        .await;

    let resolver = default_resolver(&jwks);

    // Caller gives up long before the JWKS responds
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), resolver.resolve("rsa-01")).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(resolver.cache().len().await, 1);
    assert_eq!(resolver.resolve("rsa-01").await?.kid(), "rsa-01");

    jwks.verify().await;
    Ok(())
}
