//! Verified identity attached to authenticated requests.
//!
//! The claims are exactly those carried by the token; nothing is added or
//! normalised. The `sub` claim is redacted in Debug output.

use common::jwt::TokenClaims;
use serde::Serialize;
use serde_json::{Map, Value};

/// Claims of a token whose signature and standard claims have been verified.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VerifiedIdentity {
    claims: TokenClaims,
}

impl VerifiedIdentity {
    pub(crate) fn new(claims: TokenClaims) -> Self {
        Self { claims }
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Subject (user or client ID), if the token carries a string `sub`.
    pub fn subject(&self) -> Option<&str> {
        self.claims.subject()
    }

    /// Raw value of any claim, including custom ones.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn into_claims(self) -> Map<String, Value> {
        self.claims.into_map()
    }
}
