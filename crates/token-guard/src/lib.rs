//! Token Guard Library
//!
//! Bearer-token verification for HTTP services whose tokens are issued by a
//! third-party identity provider:
//!
//! - Bearer token extraction and structural parsing (via `common::jwt`)
//! - Signing key resolution from the issuer's JWKS, cached with a TTL and
//!   fetched at most once at a time
//! - Signature verification and `exp`/`nbf`/`iss`/`aud` validation
//! - Axum middleware that attaches the verified identity or rejects with 401
//!
//! # Architecture
//!
//! ```text
//! middleware/auth.rs -> auth/jwt.rs (TokenVerifier) -> auth/jwks.rs -> auth/key_cache.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Key resolution, caching and token verification
//! - `config` - Service configuration from environment
//! - `errors` - Verification error taxonomy with 401 mapping
//! - `handlers` - HTTP request handlers for the demo service
//! - `middleware` - Authentication and HTTP metrics middleware
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
