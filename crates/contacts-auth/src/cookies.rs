//! `Set-Cookie` instructions for the session cookies.
//!
//! The tokens are already signed by the backend, so cookies carry the raw
//! token values without any encoding. Values must consist of cookie octets
//! (RFC 6265 section 4.1.1); [`append_set_cookies`] refuses anything else.
//! Compact JWTs and opaque base64url refresh tokens always qualify. The
//! access token cookie is deliberately not `HttpOnly`: browser code calls the
//! backend API directly with it.

use crate::config::{ACCESS_TOKEN_COOKIE, MAX_COOKIE_MAX_AGE, REFRESH_TOKEN_COOKIE};
use crate::credentials::CredentialPair;
use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use httpdate::fmt_http_date;
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// SameSite attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes shared by both session cookies.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    /// Cookie path.
    pub path: String,

    /// Send on HTTPS only.
    pub secure: bool,

    /// Not accessible to JS.
    pub http_only: bool,

    /// SameSite attribute.
    pub same_site: SameSite,

    /// Max-Age of cookies written at login.
    pub max_age: Duration,

    /// Name of the access token cookie.
    pub access_cookie: String,

    /// Name of the refresh token cookie.
    pub refresh_cookie: String,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            secure: false,
            http_only: false,
            same_site: SameSite::Lax,
            max_age: Duration::from_secs(604_800),
            access_cookie: ACCESS_TOKEN_COOKIE.to_string(),
            refresh_cookie: REFRESH_TOKEN_COOKIE.to_string(),
        }
    }
}

impl CookiePolicy {
    /// Write instructions storing both tokens of `pair`.
    pub fn login_cookies(&self, pair: &CredentialPair) -> Vec<SetCookie> {
        vec![
            self.write(&self.access_cookie, pair.access_token.clone()),
            self.write(&self.refresh_cookie, pair.refresh_token.clone()),
        ]
    }

    /// Write instructions clearing both session cookies.
    pub fn logout_cookies(&self) -> Vec<SetCookie> {
        vec![
            self.clear(&self.access_cookie),
            self.clear(&self.refresh_cookie),
        ]
    }

    fn write(&self, name: &str, value: SecretString) -> SetCookie {
        let max_age = self.max_age.min(MAX_COOKIE_MAX_AGE);
        let now = SystemTime::now();
        SetCookie {
            name: name.to_string(),
            value,
            max_age,
            expires: now.checked_add(max_age).unwrap_or(now),
            policy: self.clone(),
        }
    }

    fn clear(&self, name: &str) -> SetCookie {
        SetCookie {
            name: name.to_string(),
            value: SecretString::from(""),
            max_age: Duration::ZERO,
            expires: UNIX_EPOCH,
            policy: self.clone(),
        }
    }
}

/// A single cookie write instruction.
#[derive(Debug, Clone)]
pub struct SetCookie {
    /// Cookie name.
    pub name: String,

    /// Cookie value; empty when the cookie is being cleared.
    pub value: SecretString,

    /// Max-Age attribute.
    pub max_age: Duration,

    /// Expires attribute, for clients ignoring Max-Age.
    pub expires: SystemTime,

    policy: CookiePolicy,
}

impl SetCookie {
    /// True when this instruction removes the cookie.
    pub fn is_removal(&self) -> bool {
        self.max_age.is_zero()
    }

    /// True when the value can be sent without encoding.
    pub fn has_cookie_safe_value(&self) -> bool {
        self.value.expose_secret().bytes().all(is_cookie_octet)
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.push(format!("{}={}", self.name, self.value.expose_secret()));
        parts.push(format!("Path={}", self.policy.path));
        parts.push(format!("Max-Age={}", self.max_age.as_secs()));
        parts.push(format!("Expires={}", fmt_http_date(self.expires)));

        if self.policy.secure {
            parts.push("Secure".to_string());
        }
        if self.policy.http_only {
            parts.push("HttpOnly".to_string());
        }

        parts.push(format!("SameSite={}", self.policy.same_site.as_str()));

        parts.join("; ")
    }
}

/// Append one `Set-Cookie` header per instruction.
///
/// Instructions whose value is not made of cookie octets, or that do not form
/// a valid header value, are skipped.
pub fn append_set_cookies(headers: &mut HeaderMap, cookies: &[SetCookie]) {
    for cookie in cookies {
        if !cookie.has_cookie_safe_value() {
            tracing::warn!(target: "contacts.flow", cookie = %cookie.name, "Skipping cookie with unsafe value");
            continue;
        }
        match HeaderValue::from_str(&cookie.to_header_value()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(_) => {
                tracing::warn!(target: "contacts.flow", cookie = %cookie.name, "Skipping cookie with invalid header value");
            }
        }
    }
}

// %x21 / %x23-2B / %x2D-3A / %x3C-5B / %x5D-7E
fn is_cookie_octet(byte: u8) -> bool {
    matches!(byte, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}
