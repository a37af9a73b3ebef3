//! Token Guard configuration.
//!
//! Configuration is loaded from environment variables and validated once at
//! startup. A `Config` that exists is a usable one: every invariant the
//! verifier relies on is checked here.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::Algorithm;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default JWKS cache TTL in seconds (5 minutes).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 300;

/// Default JWKS fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Maximum JWKS fetch timeout in seconds.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer configuration: {0}")]
    InvalidIssuer(String),

    #[error("Invalid audience configuration: {0}")]
    InvalidAudience(String),

    #[error("Invalid algorithm configuration: {0}")]
    InvalidAlgorithms(String),

    #[error("Invalid JWKS cache TTL configuration: {0}")]
    InvalidCacheTtl(String),

    #[error("Invalid JWKS fetch timeout configuration: {0}")]
    InvalidFetchTimeout(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),
}

/// Expectations every verified token must meet.
///
/// Immutable once built. Invariants:
/// - `issuer` is an absolute http(s) URL
/// - `audience` is non-empty
/// - `allowed_algorithms` is non-empty and holds only asymmetric algorithms
///   (`none` cannot be represented, HMAC is refused)
/// - `leeway` does not exceed `MAX_CLOCK_SKEW`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationConfig {
    issuer: String,
    audience: String,
    allowed_algorithms: Vec<Algorithm>,
    leeway: Duration,
}

impl VerificationConfig {
    /// Build a verification config with zero clock-skew leeway.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if any invariant does not hold.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        algorithms: impl IntoIterator<Item = Algorithm>,
    ) -> Result<Self, ConfigError> {
        let issuer = issuer.into();
        let audience = audience.into();

        validate_issuer(&issuer)?;

        if audience.trim().is_empty() {
            return Err(ConfigError::InvalidAudience(
                "audience must not be empty".to_string(),
            ));
        }

        let mut allowed_algorithms: Vec<Algorithm> = Vec::new();
        for algorithm in algorithms {
            if is_hmac(algorithm) {
                return Err(ConfigError::InvalidAlgorithms(format!(
                    "symmetric algorithm {algorithm:?} cannot be verified with a JWKS public key"
                )));
            }
            if !allowed_algorithms.contains(&algorithm) {
                allowed_algorithms.push(algorithm);
            }
        }

        if allowed_algorithms.is_empty() {
            return Err(ConfigError::InvalidAlgorithms(
                "at least one algorithm must be allowed".to_string(),
            ));
        }

        Ok(Self {
            issuer,
            audience,
            allowed_algorithms,
            leeway: DEFAULT_CLOCK_SKEW,
        })
    }

    /// Set the clock-skew leeway applied to `exp` and `nbf`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidJwtClockSkew` if `leeway` exceeds
    /// `MAX_CLOCK_SKEW`.
    pub fn with_leeway(mut self, leeway: Duration) -> Result<Self, ConfigError> {
        if leeway > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidJwtClockSkew(format!(
                "leeway must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                leeway.as_secs()
            )));
        }
        self.leeway = leeway;
        Ok(self)
    }

    /// Expected `iss` claim, compared exactly.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expected `aud` claim member.
    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }
}

/// Token Guard service configuration.
///
/// Loaded from environment variables with sensible defaults where the
/// variable is optional. Nothing in here is secret, so `Debug` is derived.
#[derive(Debug, Clone)]
pub struct Config {
    /// Issuer, audience, algorithms and leeway for token verification.
    pub verification: VerificationConfig,

    /// How long resolved signing keys stay cached (default: 300).
    pub jwks_cache_ttl_seconds: u64,

    /// Upper bound on a single JWKS fetch (default: 10).
    pub jwks_fetch_timeout_seconds: u64,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let issuer = required(vars, "AUTH_ISSUER")?;
        let audience = required(vars, "AUTH_AUDIENCE")?;
        let algorithms = parse_algorithms(&required(vars, "AUTH_ALGORITHMS")?)?;

        let jwks_cache_ttl_seconds = match vars.get("JWKS_CACHE_TTL_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidCacheTtl(format!(
                        "JWKS_CACHE_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidCacheTtl(
                        "JWKS_CACHE_TTL_SECONDS must be greater than 0".to_string(),
                    ));
                }

                value
            }
            None => DEFAULT_JWKS_CACHE_TTL_SECONDS,
        };

        let jwks_fetch_timeout_seconds = match vars.get("JWKS_FETCH_TIMEOUT_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidFetchTimeout(format!(
                        "JWKS_FETCH_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 || value > MAX_JWKS_FETCH_TIMEOUT_SECONDS {
                    return Err(ConfigError::InvalidFetchTimeout(format!(
                        "JWKS_FETCH_TIMEOUT_SECONDS must be between 1 and {}, got {}",
                        MAX_JWKS_FETCH_TIMEOUT_SECONDS, value
                    )));
                }

                value
            }
            None => DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS,
        };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = match vars.get("JWT_CLOCK_SKEW_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidJwtClockSkew(format!(
                        "JWT_CLOCK_SKEW_SECONDS must be a valid non-negative integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value > MAX_CLOCK_SKEW.as_secs() {
                    return Err(ConfigError::InvalidJwtClockSkew(format!(
                        "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                        MAX_CLOCK_SKEW.as_secs(),
                        value
                    )));
                }

                value
            }
            None => DEFAULT_CLOCK_SKEW.as_secs(),
        };

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let verification = VerificationConfig::new(issuer, audience, algorithms)?
            .with_leeway(Duration::from_secs(jwt_clock_skew_seconds))?;

        Ok(Config {
            verification,
            jwks_cache_ttl_seconds,
            jwks_fetch_timeout_seconds,
            bind_address,
        })
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_seconds)
    }

    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.jwks_fetch_timeout_seconds)
    }
}

/// Parse a comma-separated algorithm list such as `"RS256, ES256"`.
///
/// Names are case-sensitive JWS identifiers. `none` is rejected in any case,
/// as are HMAC algorithms and unknown names.
pub fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();

    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if name.eq_ignore_ascii_case("none") {
            return Err(ConfigError::InvalidAlgorithms(
                "the 'none' algorithm is never allowed".to_string(),
            ));
        }

        let algorithm = Algorithm::from_str(name).map_err(|_| {
            ConfigError::InvalidAlgorithms(format!("unknown algorithm '{name}'"))
        })?;

        if is_hmac(algorithm) {
            return Err(ConfigError::InvalidAlgorithms(format!(
                "symmetric algorithm '{name}' is not supported"
            )));
        }

        algorithms.push(algorithm);
    }

    if algorithms.is_empty() {
        return Err(ConfigError::InvalidAlgorithms(
            "AUTH_ALGORITHMS must list at least one algorithm".to_string(),
        ));
    }

    Ok(algorithms)
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn validate_issuer(issuer: &str) -> Result<(), ConfigError> {
    if issuer.is_empty() {
        return Err(ConfigError::InvalidIssuer(
            "issuer must not be empty".to_string(),
        ));
    }

    let url = reqwest::Url::parse(issuer)
        .map_err(|e| ConfigError::InvalidIssuer(format!("issuer must be a URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidIssuer(format!(
            "issuer must be an absolute http(s) URL, got '{issuer}'"
        )));
    }

    Ok(())
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}
