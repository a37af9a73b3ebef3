//! Resolved signing keys.
//!
//! A `SigningKey` is a public key converted from a JWK, ready for signature
//! verification. A `KeySet` is the outcome of converting one JWKS document:
//! the keys that converted, plus the kids that were present but unusable.

use crate::errors::VerificationError;
use jsonwebtoken::{Algorithm, DecodingKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Key family, which determines the algorithms a key can verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// RSA public key (`n`, `e`): RS256/384/512, PS256/384/512.
    Rsa,
    /// EC P-256 public key (`x`, `y`): ES256.
    EcP256,
    /// EC P-384 public key (`x`, `y`): ES384.
    EcP384,
    /// OKP Ed25519 public key (`x`): EdDSA.
    Ed25519,
}

impl KeyFamily {
    /// Family able to verify `algorithm`, or `None` for symmetric algorithms.
    pub fn for_algorithm(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(KeyFamily::Rsa),
            Algorithm::ES256 => Some(KeyFamily::EcP256),
            Algorithm::ES384 => Some(KeyFamily::EcP384),
            Algorithm::EdDSA => Some(KeyFamily::Ed25519),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
        }
    }

    pub fn supports(self, algorithm: Algorithm) -> bool {
        Self::for_algorithm(algorithm) == Some(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyFamily::Rsa => "RSA",
            KeyFamily::EcP256 => "EC P-256",
            KeyFamily::EcP384 => "EC P-384",
            KeyFamily::Ed25519 => "OKP Ed25519",
        }
    }
}

/// A public verification key resolved from the issuer's JWKS. Immutable.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    family: KeyFamily,
    /// Algorithm the JWK pins itself to via its own `alg` member, if any.
    algorithm: Option<Algorithm>,
    decoding_key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn new(
        kid: impl Into<String>,
        family: KeyFamily,
        algorithm: Option<Algorithm>,
        decoding_key: DecodingKey,
    ) -> Self {
        Self {
            kid: kid.into(),
            family,
            algorithm,
            decoding_key,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Check that this key may verify a token signed with `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns `VerificationError::AlgorithmRejected` if the key family cannot
    /// verify `algorithm`, or the JWK pins a different algorithm.
    pub fn check_algorithm(&self, algorithm: Algorithm) -> Result<(), VerificationError> {
        if !self.family.supports(algorithm) {
            tracing::debug!(
                target: "guard.verifier",
                kid = %self.kid,
                family = self.family.as_str(),
                algorithm = ?algorithm,
                "Token algorithm does not match key family"
            );
            return Err(VerificationError::AlgorithmRejected);
        }

        if let Some(pinned) = self.algorithm {
            if pinned != algorithm {
                tracing::debug!(
                    target: "guard.verifier",
                    kid = %self.kid,
                    pinned = ?pinned,
                    algorithm = ?algorithm,
                    "Token algorithm does not match JWK alg"
                );
                return Err(VerificationError::AlgorithmRejected);
            }
        }

        Ok(())
    }
}

/// Keys converted from one JWKS document.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    rejected: HashMap<String, String>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a converted key, replacing any earlier key with the same kid.
    pub fn insert(&mut self, key: SigningKey) {
        self.rejected.remove(key.kid());
        self.keys.insert(key.kid().to_string(), Arc::new(key));
    }

    /// Record a kid that was present in the document but could not be used.
    pub fn reject(&mut self, kid: impl Into<String>, reason: impl Into<String>) {
        let kid = kid.into();
        if !self.keys.contains_key(&kid) {
            self.rejected.insert(kid, reason.into());
        }
    }

    /// Look up `kid` in this set.
    ///
    /// # Errors
    ///
    /// - `KeyConversion` - the kid was present but its key is unsupported
    /// - `KeyNotFound` - the kid is not in the set
    pub fn lookup(&self, kid: &str) -> Result<Arc<SigningKey>, VerificationError> {
        if let Some(key) = self.keys.get(kid) {
            return Ok(Arc::clone(key));
        }
        match self.rejected.get(kid) {
            Some(reason) => Err(VerificationError::KeyConversion(reason.clone())),
            None => Err(VerificationError::KeyNotFound),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<SigningKey>> {
        self.keys.values()
    }

    /// Number of usable keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ed_key(kid: &str, algorithm: Option<Algorithm>) -> SigningKey {
        // 32 zero bytes, base64url
        let decoding_key =
            DecodingKey::from_ed_components("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
        SigningKey::new(kid, KeyFamily::Ed25519, algorithm, decoding_key)
    }

    #[test]
    fn test_family_for_algorithm() {
        assert_eq!(KeyFamily::for_algorithm(Algorithm::RS256), Some(KeyFamily::Rsa));
        assert_eq!(KeyFamily::for_algorithm(Algorithm::PS512), Some(KeyFamily::Rsa));
        assert_eq!(KeyFamily::for_algorithm(Algorithm::ES256), Some(KeyFamily::EcP256));
        assert_eq!(KeyFamily::for_algorithm(Algorithm::ES384), Some(KeyFamily::EcP384));
        assert_eq!(KeyFamily::for_algorithm(Algorithm::EdDSA), Some(KeyFamily::Ed25519));
        assert_eq!(KeyFamily::for_algorithm(Algorithm::HS256), None);
    }

    #[test]
    fn test_family_supports() {
        assert!(KeyFamily::Rsa.supports(Algorithm::PS256));
        assert!(!KeyFamily::Rsa.supports(Algorithm::ES256));
        assert!(!KeyFamily::EcP256.supports(Algorithm::ES384));
        assert!(!KeyFamily::Ed25519.supports(Algorithm::HS256));
    }

    #[test]
    fn test_check_algorithm_family_mismatch() {
        let key = ed_key("k1", None);
        assert!(key.check_algorithm(Algorithm::EdDSA).is_ok());
        assert_eq!(
            key.check_algorithm(Algorithm::RS256),
            Err(VerificationError::AlgorithmRejected)
        );
    }

    #[test]
    fn test_check_algorithm_pinned_alg() {
        let key = SigningKey::new(
            "rsa",
            KeyFamily::Rsa,
            Some(Algorithm::RS256),
            DecodingKey::from_rsa_components("AQAB", "AQAB").unwrap(),
        );
        assert!(key.check_algorithm(Algorithm::RS256).is_ok());
        assert_eq!(
            key.check_algorithm(Algorithm::PS256),
            Err(VerificationError::AlgorithmRejected),
            "Same family but different pinned alg must be rejected"
        );
    }

    #[test]
    fn test_signing_key_debug_omits_material() {
        let debug_str = format!("{:?}", ed_key("k1", Some(Algorithm::EdDSA)));
        assert!(debug_str.contains("k1"));
        assert!(debug_str.contains("Ed25519"));
        assert!(!debug_str.contains("AAAAAAAA"));
    }

    #[test]
    fn test_key_set_lookup() {
        let mut set = KeySet::new();
        set.insert(ed_key("good", None));
        set.reject("bad", "unsupported key type 'oct'");

        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
        assert_eq!(set.lookup("good").unwrap().kid(), "good");
        assert_eq!(
            set.lookup("bad").unwrap_err(),
            VerificationError::KeyConversion("unsupported key type 'oct'".to_string())
        );
        assert_eq!(
            set.lookup("missing").unwrap_err(),
            VerificationError::KeyNotFound
        );
    }

    #[test]
    fn test_key_set_usable_key_wins_over_rejection() {
        let mut set = KeySet::new();
        set.reject("dup", "missing x");
        set.insert(ed_key("dup", None));
        set.reject("dup", "later duplicate is unusable");

        assert!(set.lookup("dup").is_ok());
    }
}
