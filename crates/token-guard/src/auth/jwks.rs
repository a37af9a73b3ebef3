//! JWKS key resolver for fetching and caching the issuer's public keys.
//!
//! The resolver fetches the issuer's `/.well-known/jwks.json` document,
//! converts each JWK into a `SigningKey` and caches the result in a `KeyCache`
//! for a configurable TTL.
//!
//! # Security
//!
//! - Fetch failures of any kind fail closed (`KeyResolution`), never retried
//! - Only public-key JWKs with `use` absent or `"sig"` are accepted
//! - HTTPS should be used in production (enforced by deployment config)

use crate::auth::key_cache::KeyCache;
use crate::auth::keys::{KeyFamily, KeySet, SigningKey};
use crate::errors::VerificationError;
use crate::observability::metrics;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Path of the JWKS document relative to the issuer.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// JSON Web Key from the JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC", "OKP", ...).
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// EC x coordinate, or OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,

    /// Algorithm the key is intended for.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    /// List of JSON Web Keys.
    pub keys: Vec<Jwk>,
}

/// Build the JWKS URL for `issuer`. A trailing `/` on the issuer is ignored.
pub fn jwks_url_for(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), JWKS_PATH)
}

/// Resolves signing keys by `kid` from the issuer's JWKS, through a shared
/// `KeyCache`.
pub struct JwksKeyResolver {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS. Its timeout bounds every fetch.
    http_client: reqwest::Client,

    cache: Arc<KeyCache>,
}

impl JwksKeyResolver {
    /// Create a resolver for `issuer`.
    ///
    /// # Arguments
    ///
    /// * `issuer` - Issuer URL; the JWKS is fetched from `<issuer>/.well-known/jwks.json`
    /// * `cache_ttl` - How long resolved keys stay cached
    /// * `fetch_timeout` - Upper bound on a single JWKS fetch
    pub fn new(issuer: &str, cache_ttl: Duration, fetch_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "guard.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url: jwks_url_for(issuer),
            http_client,
            cache: Arc::new(KeyCache::new(cache_ttl)),
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    pub fn cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }

    /// Resolve the signing key for `kid`.
    ///
    /// Returns the cached key if fresh, otherwise fetches the JWKS (joining a
    /// fetch already in flight) and looks `kid` up in the fetched set.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` - the fetched set has no key with this kid
    /// - `KeyConversion` - the key exists but its type or algorithm is unsupported
    /// - `KeyResolution` - network failure, timeout, non-2xx or malformed body
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve(&self, kid: &str) -> Result<Arc<SigningKey>, VerificationError> {
        let observed_at = tokio::time::Instant::now();
        if let Some(key) = self.cache.get(kid).await {
            return Ok(key);
        }

        self.resolve_from_fetch(kid, observed_at).await
    }

    /// Resolve `kid` bypassing the cache.
    ///
    /// Still single-flight: joins a fetch already in flight rather than
    /// starting a second one. Never called automatically; callers that want
    /// a retry after `KeyNotFound` must ask for it.
    ///
    /// # Errors
    ///
    /// Same as [`JwksKeyResolver::resolve`].
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve_fresh(&self, kid: &str) -> Result<Arc<SigningKey>, VerificationError> {
        let observed_at = tokio::time::Instant::now();
        self.resolve_from_fetch(kid, observed_at).await
    }

    async fn resolve_from_fetch(
        &self,
        kid: &str,
        observed_at: tokio::time::Instant,
    ) -> Result<Arc<SigningKey>, VerificationError> {
        let http_client = self.http_client.clone();
        let jwks_url = self.jwks_url.clone();

        let keys = self
            .cache
            .fetch_once(observed_at, move || fetch_key_set(http_client, jwks_url))
            .await?;

        keys.lookup(kid).map_err(|e| {
            tracing::warn!(
                target: "guard.jwks",
                kid = %kid,
                error_kind = e.kind(),
                "Key not usable after JWKS refresh"
            );
            e
        })
    }
}

/// Fetch and convert the JWKS document at `jwks_url`.
async fn fetch_key_set(
    http_client: reqwest::Client,
    jwks_url: String,
) -> Result<KeySet, VerificationError> {
    let start = Instant::now();
    let result = fetch_jwks(&http_client, &jwks_url).await;

    let status = match &result {
        Ok(_) => "success",
        Err(VerificationError::KeyResolution(reason)) if reason.contains("timed out") => "timeout",
        Err(_) => "error",
    };
    metrics::record_jwks_fetch(status, start.elapsed());

    let jwks = result?;
    let keys = convert_key_set(jwks);

    tracing::info!(
        target: "guard.jwks",
        key_count = keys.len(),
        "JWKS refreshed"
    );

    Ok(keys)
}

async fn fetch_jwks(
    http_client: &reqwest::Client,
    jwks_url: &str,
) -> Result<JwksResponse, VerificationError> {
    tracing::debug!(target: "guard.jwks", url = %jwks_url, "Fetching JWKS");

    let response = http_client.get(jwks_url).send().await.map_err(|e| {
        tracing::error!(target: "guard.jwks", error = %e, "Failed to fetch JWKS");
        let reason = if e.is_timeout() {
            "JWKS fetch timed out"
        } else {
            "JWKS fetch failed"
        };
        VerificationError::KeyResolution(reason.to_string())
    })?;

    if !response.status().is_success() {
        tracing::error!(
            target: "guard.jwks",
            status = %response.status(),
            "JWKS endpoint returned error"
        );
        return Err(VerificationError::KeyResolution(format!(
            "JWKS endpoint returned {}",
            response.status().as_u16()
        )));
    }

    response.json::<JwksResponse>().await.map_err(|e| {
        tracing::error!(target: "guard.jwks", error = %e, "Failed to parse JWKS response");
        let reason = if e.is_timeout() {
            "JWKS fetch timed out"
        } else {
            "JWKS response malformed"
        };
        VerificationError::KeyResolution(reason.to_string())
    })
}

/// Convert every JWK in `jwks`. Keys without a kid are skipped; unusable keys
/// are recorded as rejected so a lookup reports `KeyConversion`.
pub fn convert_key_set(jwks: JwksResponse) -> KeySet {
    let mut keys = KeySet::new();

    for jwk in jwks.keys {
        let Some(kid) = jwk.kid.clone().filter(|kid| !kid.is_empty()) else {
            tracing::debug!(target: "guard.jwks", kty = %jwk.kty, "Skipping JWK without kid");
            continue;
        };

        match convert_jwk(&kid, &jwk) {
            Ok(key) => keys.insert(key),
            Err(reason) => {
                tracing::warn!(target: "guard.jwks", kid = %kid, reason = %reason, "Unusable JWK");
                keys.reject(kid, reason);
            }
        }
    }

    keys
}

/// Convert one JWK into a `SigningKey`. The error is a short reason string.
pub fn convert_jwk(kid: &str, jwk: &Jwk) -> Result<SigningKey, String> {
    if let Some(key_use) = &jwk.key_use {
        if key_use != "sig" {
            return Err(format!("key use '{key_use}' is not 'sig'"));
        }
    }

    let pinned = match &jwk.alg {
        Some(alg) => Some(
            Algorithm::from_str(alg).map_err(|_| format!("unsupported JWK alg '{alg}'"))?,
        ),
        None => None,
    };

    let (family, decoding_key) = match jwk.kty.as_str() {
        "RSA" => {
            let n = required_member(jwk.n.as_deref(), "n")?;
            let e = required_member(jwk.e.as_deref(), "e")?;
            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| format!("invalid RSA components: {e}"))?;
            (KeyFamily::Rsa, key)
        }
        "EC" => {
            let family = match jwk.crv.as_deref() {
                Some("P-256") => KeyFamily::EcP256,
                Some("P-384") => KeyFamily::EcP384,
                other => return Err(format!("unsupported EC curve {other:?}")),
            };
            let x = required_member(jwk.x.as_deref(), "x")?;
            let y = required_member(jwk.y.as_deref(), "y")?;
            let key = DecodingKey::from_ec_components(x, y)
                .map_err(|e| format!("invalid EC components: {e}"))?;
            (family, key)
        }
        "OKP" => {
            if jwk.crv.as_deref() != Some("Ed25519") {
                return Err(format!("unsupported OKP curve {:?}", jwk.crv));
            }
            let x = required_member(jwk.x.as_deref(), "x")?;
            let key = DecodingKey::from_ed_components(x)
                .map_err(|e| format!("invalid Ed25519 key: {e}"))?;
            (KeyFamily::Ed25519, key)
        }
        other => return Err(format!("unsupported key type '{other}'")),
    };

    if let Some(alg) = pinned {
        if !family.supports(alg) {
            return Err(format!(
                "JWK alg {alg:?} does not match {} key",
                family.as_str()
            ));
        }
    }

    Ok(SigningKey::new(kid, family, pinned, decoding_key))
}

fn required_member<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("JWK missing '{name}'"))
}
