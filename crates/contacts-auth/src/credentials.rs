//! Credential exchange with the token-issuing backend.
//!
//! Posts an email/password pair to the backend and returns the access and
//! refresh tokens it mints. Every failure to obtain a pair is reported as
//! invalid credentials; a 2xx answer without two non-empty token strings is
//! reported as an invalid credential response.
//!
//! # Security
//!
//! - The password is held as `SecretString` and never logged
//! - Returned tokens are wrapped in `SecretString` immediately
//! - Response bodies of rejected requests are only logged at trace level

use crate::errors::AuthError;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Path of the token-issuing endpoint, relative to the backend base URL.
pub const GET_USER_TOKEN_PATH: &str = "/Auth/GetUserToken";

/// Access and refresh tokens minted by the backend.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl CredentialPair {
    /// Validate a credential endpoint response body.
    ///
    /// Both `accessToken` and `refreshToken` must be non-empty strings.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentialResponse` naming the offending field.
    pub fn from_response(body: &Value) -> Result<Self, AuthError> {
        let access_token = required_token(body, "accessToken")?;
        let refresh_token = required_token(body, "refreshToken")?;

        Ok(Self {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
        })
    }
}

fn required_token(body: &Value, field: &str) -> Result<String, AuthError> {
    match body.get(field) {
        Some(Value::String(token)) if !token.is_empty() => Ok(token.clone()),
        Some(Value::String(_)) => Err(AuthError::InvalidCredentialResponse(format!(
            "{field} must not be empty"
        ))),
        Some(_) => Err(AuthError::InvalidCredentialResponse(format!(
            "{field} must be string"
        ))),
        None => Err(AuthError::InvalidCredentialResponse(format!(
            "{field} is missing"
        ))),
    }
}

#[derive(Serialize)]
struct GetUserTokenRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Client for the credential-issuing endpoint.
pub struct CredentialClient {
    /// Backend base URL (e.g., `http://localhost:5167`).
    base_url: String,

    /// HTTP client with request timeout applied.
    http_client: reqwest::Client,
}

impl CredentialClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(target: "contacts.credentials", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// Exchange an email/password pair for a token pair.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidCredentials` if the request fails or the backend
    ///   answers with a non-success status
    /// - `AuthError::InvalidCredentialResponse` if the backend answers 2xx
    ///   without a usable token pair
    #[instrument(skip_all)]
    pub async fn exchange(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<CredentialPair, AuthError> {
        let url = format!("{}{}", self.base_url, GET_USER_TOKEN_PATH);

        debug!(target: "contacts.credentials", url = %url, "Requesting user token");

        let response = self
            .http_client
            .post(&url)
            .json(&GetUserTokenRequest {
                email,
                password: password.expose_secret(),
            })
            .send()
            .await
            .map_err(|e| {
                warn!(target: "contacts.credentials", error = %e, "Credential request failed");
                AuthError::InvalidCredentials
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "contacts.credentials", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(
                target: "contacts.credentials",
                status = %status,
                "Credentials rejected by backend"
            );
            trace!(
                target: "contacts.credentials",
                body = %body,
                "Credential rejection response body"
            );
            return Err(AuthError::InvalidCredentials);
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!(target: "contacts.credentials", error = %e, "Failed to parse credential response");
            AuthError::InvalidCredentialResponse("response is not JSON".to_string())
        })?;

        let pair = CredentialPair::from_response(&body)?;

        debug!(target: "contacts.credentials", "User token acquired");

        Ok(pair)
    }
}
