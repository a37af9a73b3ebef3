//! Mock JWKS endpoint backed by wiremock.

use serde_json::{json, Value};
use std::time::Duration;
use token_guard::auth::jwks::JWKS_PATH;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An issuer whose JWKS lives at `{issuer}/.well-known/jwks.json`.
///
/// Mounted responses stack; call `reset` before mounting a rotated key set.
pub struct MockJwks {
    server: MockServer,
}

impl MockJwks {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Issuer URL to configure the verifier with.
    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Serve `keys` on every request.
    pub async fn mount_keys(&self, keys: &[Value]) {
        jwks_mock(ResponseTemplate::new(200).set_body_json(jwks_body(keys)))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` and fail `verify` unless exactly `times` requests arrive.
    pub async fn mount_keys_expect(&self, keys: &[Value], times: u64) {
        jwks_mock(ResponseTemplate::new(200).set_body_json(jwks_body(keys)))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` after `delay`, expecting exactly `times` requests.
    pub async fn mount_delayed(&self, keys: &[Value], delay: Duration, times: u64) {
        jwks_mock(
            ResponseTemplate::new(200)
                .set_body_json(jwks_body(keys))
                .set_delay(delay),
        )
        .expect(times)
        .mount(&self.server)
        .await;
    }

    /// Answer every JWKS request with `status` and an empty body.
    pub async fn mount_status(&self, status: u16) {
        jwks_mock(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answer with a 200 and an arbitrary body.
    pub async fn mount_raw_body(&self, body: &str) {
        jwks_mock(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Drop all mounted responses and recorded requests.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Panic if an `expect`ed request count was not met.
    pub async fn verify(&self) {
        self.server.verify().await;
    }

    /// Number of JWKS requests received so far.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }
}

fn jwks_mock(response: ResponseTemplate) -> Mock {
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(response)
}

/// `{"keys": [...]}` document.
pub fn jwks_body(keys: &[Value]) -> Value {
    json!({ "keys": keys })
}
