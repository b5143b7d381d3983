//! Session token extraction from request cookies.
//!
//! Reads the access and refresh tokens out of the `Cookie` header(s) of an
//! inbound request. A missing or unparsable cookie is reported as absent,
//! never as an error.

use crate::config::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
use axum::http::{header::COOKIE, HeaderMap};
use secrecy::SecretString;

/// Raw tokens carried by a request.
#[derive(Debug, Clone, Default)]
pub struct SessionTokens {
    /// Compact access token, if present.
    pub access_token: Option<SecretString>,

    /// Opaque refresh token, if present.
    pub refresh_token: Option<SecretString>,
}

impl SessionTokens {
    pub fn new(access_token: Option<SecretString>, refresh_token: Option<SecretString>) -> Self {
        Self {
            access_token,
            refresh_token,
        }
    }
}

/// Reads session tokens from request headers.
#[derive(Debug, Clone)]
pub struct SessionReader {
    access_cookie: String,
    refresh_cookie: String,
}

impl Default for SessionReader {
    fn default() -> Self {
        Self::new(ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE)
    }
}

impl SessionReader {
    /// Create a reader for the given cookie names.
    pub fn new(access_cookie: &str, refresh_cookie: &str) -> Self {
        Self {
            access_cookie: access_cookie.to_string(),
            refresh_cookie: refresh_cookie.to_string(),
        }
    }

    /// Read the access token cookie.
    pub fn read_access_token(&self, headers: &HeaderMap) -> Option<SecretString> {
        find_cookie(headers, &self.access_cookie).map(SecretString::from)
    }

    /// Read the refresh token cookie.
    pub fn read_refresh_token(&self, headers: &HeaderMap) -> Option<SecretString> {
        find_cookie(headers, &self.refresh_cookie).map(SecretString::from)
    }

    /// Read both tokens.
    pub fn read(&self, headers: &HeaderMap) -> SessionTokens {
        let tokens = SessionTokens::new(
            self.read_access_token(headers),
            self.read_refresh_token(headers),
        );

        tracing::trace!(
            target: "contacts.session",
            has_access_token = tokens.access_token.is_some(),
            has_refresh_token = tokens.refresh_token.is_some(),
            "Session cookies read"
        );

        tokens
    }
}

/// Find the first non-empty cookie named `name` across all `Cookie` headers.
///
/// Values are returned as sent, without decoding, matching how
/// [`crate::cookies`] writes them.
fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| match value.to_str() {
            Ok(s) => Some(s),
            Err(_) => {
                tracing::debug!(target: "contacts.session", "Ignoring non-UTF-8 Cookie header");
                None
            }
        })
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(cookie_name, _)| cookie_name.trim() == name)
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|value| !value.is_empty())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
