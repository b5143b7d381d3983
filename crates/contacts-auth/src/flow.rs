//! Request-level authentication entry points.
//!
//! Every guard runs the same [`TokenVerifier::verify`] and only differs in
//! how a failure is presented to the caller:
//!
//! - [`AuthenticationFlow::require_or_redirect`] sends the browser to the
//!   login screen
//! - [`AuthenticationFlow::require_or_soft_error`] hands back empty tokens and
//!   an error marker for the page to render
//! - [`AuthenticationFlow::require_or_throw`] raises [`AuthError`]
//!
//! Login and logout produce `Set-Cookie` instructions for the session cookies.

use crate::auth::key_ring::JwksKeyRing;
use crate::auth::verifier::{AuthOutcome, TokenRenewal, TokenVerifier, VerifiedIdentity};
use crate::config::AuthConfig;
use crate::cookies::{CookiePolicy, SetCookie};
use crate::credentials::{CredentialClient, CredentialPair};
use crate::errors::{AuthError, ErrorCode};
use crate::session::SessionReader;
use axum::http::{header::LOCATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::instrument;

/// Redirect to the login screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    location: String,
    code: ErrorCode,
}

impl LoginRedirect {
    /// Where the browser is sent.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Why the request was redirected.
    pub fn error_code(&self) -> ErrorCode {
        self.code
    }
}

impl IntoResponse for LoginRedirect {
    fn into_response(self) -> Response {
        (StatusCode::FOUND, [(LOCATION, self.location)]).into_response()
    }
}

/// Outcome of a guard that never fails the request.
#[derive(Debug, Clone)]
pub enum SoftAuth {
    Authenticated(VerifiedIdentity),
    Failed(ErrorCode),
}

impl SoftAuth {
    /// The access token, or `""` when authentication failed.
    pub fn access_token(&self) -> &str {
        match self {
            SoftAuth::Authenticated(identity) => identity.access_token().expose_secret(),
            SoftAuth::Failed(_) => "",
        }
    }

    /// The refresh token, or `""` when absent or authentication failed.
    pub fn refresh_token(&self) -> &str {
        match self {
            SoftAuth::Authenticated(identity) => identity
                .refresh_token()
                .map_or("", |token| token.expose_secret()),
            SoftAuth::Failed(_) => "",
        }
    }

    /// Error marker, present only when authentication failed.
    pub fn error(&self) -> Option<ErrorCode> {
        match self {
            SoftAuth::Authenticated(_) => None,
            SoftAuth::Failed(code) => Some(*code),
        }
    }

    pub fn identity(&self) -> Option<&VerifiedIdentity> {
        match self {
            SoftAuth::Authenticated(identity) => Some(identity),
            SoftAuth::Failed(_) => None,
        }
    }
}

/// Authentication entry points for request handlers.
pub struct AuthenticationFlow {
    verifier: TokenVerifier,
    session: SessionReader,
    credentials: CredentialClient,
    cookies: CookiePolicy,
    login_path: String,
}

impl AuthenticationFlow {
    pub fn new(
        verifier: TokenVerifier,
        session: SessionReader,
        credentials: CredentialClient,
        cookies: CookiePolicy,
        login_path: String,
    ) -> Self {
        Self {
            verifier,
            session,
            credentials,
            cookies,
            login_path,
        }
    }

    /// Wire up the flow against the backend named in `config`.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::build(config, None)
    }

    /// Like [`from_config`](Self::from_config), consulting `renewal` for
    /// expired tokens.
    pub fn from_config_with_renewal(config: &AuthConfig, renewal: Arc<dyn TokenRenewal>) -> Self {
        Self::build(config, Some(renewal))
    }

    fn build(config: &AuthConfig, renewal: Option<Arc<dyn TokenRenewal>>) -> Self {
        let key_ring = Arc::new(JwksKeyRing::new(
            config.jwks_url.clone(),
            config.jwks_timeout,
        ));
        let mut verifier = TokenVerifier::new(key_ring);
        if let Some(renewal) = renewal {
            verifier = verifier.with_renewal(renewal);
        }

        let cookies = CookiePolicy {
            secure: config.cookie_secure,
            max_age: config.cookie_max_age,
            ..CookiePolicy::default()
        };
        let session = SessionReader::new(&cookies.access_cookie, &cookies.refresh_cookie);

        Self::new(
            verifier,
            session,
            CredentialClient::new(config.auth_api_url.clone(), config.http_timeout),
            cookies,
            config.login_path.clone(),
        )
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookies
    }

    /// Read and verify the session carried by `headers`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let tokens = self.session.read(headers);
        self.verifier.verify(&tokens).await
    }

    /// Verify the session or redirect to the login screen.
    ///
    /// # Errors
    ///
    /// Returns a [`LoginRedirect`] when the session does not verify.
    #[instrument(skip_all)]
    pub async fn require_or_redirect(
        &self,
        headers: &HeaderMap,
    ) -> Result<VerifiedIdentity, LoginRedirect> {
        self.authenticate(headers)
            .await
            .into_result()
            .map_err(|code| {
                tracing::debug!(target: "contacts.flow", code = %code, location = %self.login_path, "Redirecting to login");
                LoginRedirect {
                    location: self.login_path.clone(),
                    code,
                }
            })
    }

    /// Verify the session, reporting failure as empty tokens and a marker.
    #[instrument(skip_all)]
    pub async fn require_or_soft_error(&self, headers: &HeaderMap) -> SoftAuth {
        match self.authenticate(headers).await {
            AuthOutcome::Authenticated(identity) => SoftAuth::Authenticated(identity),
            AuthOutcome::Unauthenticated(code) => {
                tracing::debug!(target: "contacts.flow", code = %code, "Soft authentication failure");
                SoftAuth::Failed(code)
            }
        }
    }

    /// Verify the session or raise.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Unauthenticated` carrying the rejection code.
    #[instrument(skip_all)]
    pub async fn require_or_throw(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, AuthError> {
        self.authenticate(headers)
            .await
            .into_result()
            .map_err(AuthError::from)
    }

    /// Exchange credentials and return the cookie writes for the new session.
    ///
    /// # Errors
    ///
    /// Propagates [`CredentialClient::exchange`] failures; no cookies are
    /// written in that case.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Vec<SetCookie>, AuthError> {
        let pair = self.credentials.exchange(email, password).await?;
        tracing::info!(target: "contacts.flow", "Login succeeded");
        Ok(self.cookies.login_cookies(&pair))
    }

    /// Cookie writes clearing the session.
    pub fn logout(&self) -> Vec<SetCookie> {
        tracing::debug!(target: "contacts.flow", "Clearing session cookies");
        self.cookies.logout_cookies()
    }

    /// Cookie writes for an identity whose tokens were renewed during
    /// verification. Empty when nothing changed.
    pub fn renewal_cookies(&self, identity: &VerifiedIdentity) -> Vec<SetCookie> {
        if !identity.renewed() {
            return Vec::new();
        }

        match identity.refresh_token() {
            Some(refresh_token) => self.cookies.login_cookies(&CredentialPair {
                access_token: identity.access_token().clone(),
                refresh_token: refresh_token.clone(),
            }),
            None => Vec::new(),
        }
    }
}
