//! wiremock stand-in for the token-issuing backend.
//!
//! Serves the JWKS document and the credential endpoint on one mock server,
//! the way the real backend does.

use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the JWKS document is served under.
pub const JWKS_PATH: &str = "/.well-known/jwks";

/// Path of the credential endpoint.
pub const USER_TOKEN_PATH: &str = "/Auth/GetUserToken";

/// Mock backend wrapping a [`MockServer`].
pub struct MockBackend {
    pub server: MockServer,
}

impl MockBackend {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL of the backend.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Full URL of the JWKS document.
    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Serve `keys` as the JWKS document.
    pub async fn mount_jwks(&self, keys: &[Value]) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` and fail verification of the mock on drop unless the
    /// document is fetched exactly `fetches` times.
    pub async fn mount_jwks_expecting(&self, keys: &[Value], fetches: u64) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .expect(fetches)
            .mount(&self.server)
            .await;
    }

    /// Answer JWKS requests with `status` and an empty body.
    pub async fn mount_jwks_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` only after `delay`.
    pub async fn mount_slow_jwks(&self, keys: &[Value], delay: Duration) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": keys }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Accept any credentials and mint `access_token`/`refresh_token`.
    pub async fn mount_user_token(&self, access_token: &str, refresh_token: &str) {
        self.mount_user_token_response(
            ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": access_token,
                "refreshToken": refresh_token,
            })),
        )
        .await;
    }

    /// Answer credential requests with an arbitrary response.
    pub async fn mount_user_token_response(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(USER_TOKEN_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}
