//! Middleware for Token Guard.
//!
//! # Components
//!
//! - `auth` - Bearer token verification for protected routes
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, AuthState, IdentityExt};
pub use http_metrics::http_metrics_middleware;
