//! Token authentication for Token Guard.
//!
//! # Components
//!
//! - `keys` - Resolved signing keys and key sets
//! - `key_cache` - TTL cache of signing keys with single-flight JWKS fetches
//! - `jwks` - JWKS key resolver
//! - `jwt` - Algorithm selection, signature and claims verification
//! - `identity` - Verified identity handed to request handlers

pub mod identity;
pub mod jwks;
pub mod jwt;
pub mod key_cache;
pub mod keys;

pub use identity::VerifiedIdentity;
pub use jwks::{Jwk, JwksKeyResolver, JwksResponse};
pub use jwt::{
    select_algorithm, validate_claims, validate_claims_at, verify_signature, TokenVerifier,
};
pub use key_cache::KeyCache;
pub use keys::{KeyFamily, KeySet, SigningKey};
