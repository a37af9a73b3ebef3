//! Test signing keys.
//!
//! Each key type signs tokens with `jsonwebtoken` and publishes the matching
//! public JWK for a mock JWKS endpoint.
//!
//! - `TestRsaKey`: fixed 2048-bit RSA key (RS* and PS* algorithms)
//! - `TestEcKey`: freshly generated P-256 or P-384 key (ES256, ES384)
//! - `TestEdKey`: Ed25519 key derived from a one-byte seed (EdDSA)

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
    ECDSA_P384_SHA384_FIXED_SIGNING,
};
use serde_json::{json, Value};

/// PKCS#1 PEM of the RSA test key. Test-only; never use outside tests.
pub const RSA_TEST_KEY_PEM: &str = include_str!("fixtures/rsa_test_key.pem");

/// Base64url modulus of `RSA_TEST_KEY_PEM`.
pub const RSA_TEST_KEY_N: &str = "sx8oFC-waT-07mSnALB5Lgm5Gr0vsk8E6a2GrlbtNsmdcv08FUAR5KtrDtr_e21s9EHMmtoOxHpd7ZCphiFIc8f2Tu_TE5hh5Js_qeLoICFiO3bxS-SPBy0Ju7tADnE5sYlw24XQq2E7EZuSt0DFQhAa4k3aS7Fesg_ggHGydRQpFq43mqBYDg0qjyKbMoH7TI1kHmdO0qabcZ0sBlksyoSA2OqMrAw982SRWs3BJIavvd8G9MlJRPVrBr18U95LddhMeUBC2W_KQuGUKeKh7g1DN0KntFoniK8wtOBL4emPiS4uwlwPc9OwwROzZCDquTlj5iQ0SgfKC1ohAphyOQ";

/// Base64url public exponent of `RSA_TEST_KEY_PEM` (65537).
pub const RSA_TEST_KEY_E: &str = "AQAB";

/// A key that can sign test tokens and describe itself as a JWK.
pub trait TestSigner {
    fn kid(&self) -> &str;

    fn algorithm(&self) -> Algorithm;

    fn encoding_key(&self) -> EncodingKey;

    /// Public JWK, including `kid`, `alg` and `use`.
    fn jwk(&self) -> Value;

    /// Header with this key's `alg` and `kid`, `typ: JWT`.
    fn header(&self) -> Header {
        let mut header = Header::new(self.algorithm());
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid().to_string());
        header
    }

    /// Sign `claims` with this key's default header.
    fn sign(&self, claims: &Value) -> String {
        self.sign_with_header(&self.header(), claims)
    }

    /// Sign `claims` with a caller-supplied header (e.g. a different `kid`).
    fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        encode(header, claims, &self.encoding_key()).expect("Failed to sign test token")
    }
}

/// RSA test key.
pub struct TestRsaKey {
    kid: String,
    algorithm: Algorithm,
}

impl TestRsaKey {
    /// RS256 key with the given kid.
    pub fn new(kid: &str) -> Self {
        Self::with_algorithm(kid, Algorithm::RS256)
    }

    /// Same key material, signing with `algorithm` (any RS* or PS*).
    pub fn with_algorithm(kid: &str, algorithm: Algorithm) -> Self {
        Self {
            kid: kid.to_string(),
            algorithm,
        }
    }
}

impl TestSigner for TestRsaKey {
    fn kid(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_rsa_pem(RSA_TEST_KEY_PEM.as_bytes()).expect("Invalid RSA test key PEM")
    }

    fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "n": RSA_TEST_KEY_N,
            "e": RSA_TEST_KEY_E,
            "alg": algorithm_name(self.algorithm),
            "use": "sig"
        })
    }
}

/// ECDSA test key, generated per instance.
pub struct TestEcKey {
    kid: String,
    algorithm: Algorithm,
    private_key_pkcs8: Vec<u8>,
    x: Vec<u8>,
    y: Vec<u8>,
}

impl TestEcKey {
    /// P-256 key for ES256.
    pub fn p256(kid: &str) -> Self {
        Self::generate(kid, Algorithm::ES256)
    }

    /// P-384 key for ES384.
    pub fn p384(kid: &str) -> Self {
        Self::generate(kid, Algorithm::ES384)
    }

    fn generate(kid: &str, algorithm: Algorithm) -> Self {
        let signing_alg = match algorithm {
            Algorithm::ES256 => &ECDSA_P256_SHA256_FIXED_SIGNING,
            Algorithm::ES384 => &ECDSA_P384_SHA384_FIXED_SIGNING,
            other => panic!("Unsupported EC test algorithm: {other:?}"),
        };

        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(signing_alg, &rng)
            .expect("Failed to generate EC test key");
        let key_pair = EcdsaKeyPair::from_pkcs8(signing_alg, pkcs8.as_ref(), &rng)
            .expect("Failed to parse EC test key");

        // Uncompressed point: 0x04 || x || y
        let point = key_pair.public_key().as_ref();
        let coordinate_len = (point.len() - 1) / 2;
        let x = point[1..=coordinate_len].to_vec();
        let y = point[1 + coordinate_len..].to_vec();

        Self {
            kid: kid.to_string(),
            algorithm,
            private_key_pkcs8: pkcs8.as_ref().to_vec(),
            x,
            y,
        }
    }
}

impl TestSigner for TestEcKey {
    fn kid(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ec_der(&self.private_key_pkcs8)
    }

    fn jwk(&self) -> Value {
        let crv = match self.algorithm {
            Algorithm::ES384 => "P-384",
            _ => "P-256",
        };
        json!({
            "kty": "EC",
            "kid": self.kid,
            "crv": crv,
            "x": URL_SAFE_NO_PAD.encode(&self.x),
            "y": URL_SAFE_NO_PAD.encode(&self.y),
            "alg": algorithm_name(self.algorithm),
            "use": "sig"
        })
    }
}

/// Ed25519 test key derived deterministically from a seed byte.
pub struct TestEdKey {
    kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestEdKey {
    pub fn new(seed: u8, kid: &str) -> Self {
        // Create deterministic seed
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("Failed to create Ed25519 test key");

        Self {
            kid: kid.to_string(),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_ed25519_pkcs8(&seed_bytes),
        }
    }
}

impl TestSigner for TestEdKey {
    fn kid(&self) -> &str {
        &self.kid
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::EdDSA
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.private_key_pkcs8)
    }

    fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }
}

/// Build a PKCS#8 v1 document from an Ed25519 seed.
fn build_ed25519_pkcs8(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier: SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // PrivateKey: OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// JWS name of an algorithm as used in JWK `alg` members.
pub fn algorithm_name(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::EdDSA => "EdDSA",
    }
}
