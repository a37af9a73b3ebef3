//! # Token Guard Test Utilities
//!
//! Shared test utilities for Token Guard.
//!
//! This crate provides:
//! - Deterministic signing keys for every supported key family (`TestRsaKey`,
//!   `TestEcKey`, `TestEdKey`) with matching JWKs
//! - Claim and token builders
//! - A wiremock-backed JWKS endpoint (`MockJwks`)
//! - Server test harness (`TestGuardServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guard_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let jwks = MockJwks::start().await;
//!     let key = TestRsaKey::new("rsa-01");
//!     jwks.mount_keys(&[key.jwk()]).await;
//!
//!     let server = TestGuardServer::spawn(test_config(&jwks.issuer())).await?;
//!     let token = key.sign(&valid_claims(&jwks.issuer(), TEST_AUDIENCE));
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/v1/me", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod jwks_server;
pub mod keys;
pub mod server_harness;
pub mod tokens;

// Re-export commonly used items
pub use jwks_server::*;
pub use keys::*;
pub use server_harness::*;
pub use tokens::*;
