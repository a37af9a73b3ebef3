//! Test server harness for E2E testing
//!
//! Provides `TestGuardServer` for spawning the real Token Guard router in
//! tests.

use crate::tokens::TEST_AUDIENCE;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use token_guard::auth::TokenVerifier;
use token_guard::config::Config;
use token_guard::middleware::AuthState;
use token_guard::routes::{self, init_metrics_recorder};

/// Global metrics handle shared by every test server in a test binary.
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// The installed recorder's handle, or a detached one if another recorder
/// was installed first.
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Environment variables for a verifier trusting `issuer` with RS256, PS256,
/// ES256, ES384 and EdDSA.
pub fn test_vars(issuer: &str) -> HashMap<String, String> {
    HashMap::from([
        ("AUTH_ISSUER".to_string(), issuer.to_string()),
        ("AUTH_AUDIENCE".to_string(), TEST_AUDIENCE.to_string()),
        (
            "AUTH_ALGORITHMS".to_string(),
            "RS256,PS256,ES256,ES384,EdDSA".to_string(),
        ),
        ("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "2".to_string()),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
    ])
}

/// `Config` built from `test_vars`.
pub fn test_config(issuer: &str) -> Config {
    Config::from_vars(&test_vars(issuer)).expect("Failed to create test config")
}

/// Test harness for spawning Token Guard in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<()> {
///     let server = TestGuardServer::spawn(test_config("https://idp.example.com")).await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGuardServer {
    addr: SocketAddr,
    auth_state: Arc<AuthState>,
    _handle: JoinHandle<()>,
}

impl TestGuardServer {
    /// Spawn a server on a random local port.
    ///
    /// # Returns
    /// * `Ok(TestGuardServer)` - Running server instance
    /// * `Err(anyhow::Error)` - If the listener cannot be bound
    pub async fn spawn(config: Config) -> Result<Self, anyhow::Error> {
        let auth_state = Arc::new(AuthState::new(TokenVerifier::from_config(&config)));

        // Build routes using token-guard's real route builder
        let app = routes::build_routes(Arc::clone(&auth_state), test_metrics_handle());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            auth_state,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The verifier serving requests, for inspecting its key cache.
    pub fn verifier(&self) -> &TokenVerifier {
        &self.auth_state.verifier
    }
}

impl Drop for TestGuardServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
