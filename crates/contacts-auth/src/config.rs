//! Authentication configuration.
//!
//! Configuration is loaded from environment variables with defaults that
//! match a local development backend on port 5167.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default JWKS endpoint of the backend.
pub const DEFAULT_JWKS_URL: &str = "http://localhost:5167/.well-known/jwks";

/// Default base URL of the credential-issuing backend.
pub const DEFAULT_AUTH_API_URL: &str = "http://localhost:5167";

/// Default timeout for a JWKS fetch.
pub const DEFAULT_JWKS_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for credential exchange requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound accepted for any configured HTTP timeout.
pub const MAX_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Default lifetime of the session cookies (7 days).
pub const DEFAULT_COOKIE_MAX_AGE: Duration = Duration::from_secs(604_800);

/// Upper bound accepted for the session cookie lifetime (400 days).
pub const MAX_COOKIE_MAX_AGE: Duration = Duration::from_secs(34_560_000);

/// Default path of the login screen.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Name of the cookie carrying the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "__accessToken";

/// Name of the cookie carrying the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "__refreshToken";

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// URL of the JWKS document used to verify token signatures.
    pub jwks_url: String,

    /// Base URL of the credential-issuing backend.
    pub auth_api_url: String,

    /// Timeout applied to each JWKS fetch.
    pub jwks_timeout: Duration,

    /// Timeout applied to credential exchange requests.
    pub http_timeout: Duration,

    /// Max-Age of the session cookies written at login.
    pub cookie_max_age: Duration,

    /// Whether session cookies carry the `Secure` attribute.
    pub cookie_secure: bool,

    /// Where unauthenticated requests are redirected.
    pub login_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: DEFAULT_JWKS_URL.to_string(),
            auth_api_url: DEFAULT_AUTH_API_URL.to_string(),
            jwks_timeout: DEFAULT_JWKS_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            cookie_max_age: DEFAULT_COOKIE_MAX_AGE,
            cookie_secure: false,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("Invalid cookie configuration: {0}")]
    InvalidCookie(String),

    #[error("Invalid login path: {0}")]
    InvalidLoginPath(String),
}

impl AuthConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwks_url = vars
            .get("JWKS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_JWKS_URL.to_string());

        let auth_api_url = vars
            .get("AUTH_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_AUTH_API_URL.to_string());

        let jwks_timeout = parse_timeout(vars, "JWKS_TIMEOUT_SECONDS", DEFAULT_JWKS_TIMEOUT)?;
        let http_timeout = parse_timeout(vars, "AUTH_HTTP_TIMEOUT_SECONDS", DEFAULT_HTTP_TIMEOUT)?;

        let cookie_max_age = match vars.get("SESSION_COOKIE_MAX_AGE_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidCookie(format!(
                        "SESSION_COOKIE_MAX_AGE_SECONDS must be a valid integer, got '{}': {}",
                        value_str, e
                    ))
                })?;
                if value == 0 {
                    return Err(ConfigError::InvalidCookie(
                        "SESSION_COOKIE_MAX_AGE_SECONDS must be positive".to_string(),
                    ));
                }
                if value > MAX_COOKIE_MAX_AGE.as_secs() {
                    return Err(ConfigError::InvalidCookie(format!(
                        "SESSION_COOKIE_MAX_AGE_SECONDS must be at most {}, got {}",
                        MAX_COOKIE_MAX_AGE.as_secs(),
                        value
                    )));
                }
                Duration::from_secs(value)
            }
            None => DEFAULT_COOKIE_MAX_AGE,
        };

        let cookie_secure = match vars.get("SESSION_COOKIE_SECURE").map(String::as_str) {
            None => false,
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidCookie(format!(
                    "SESSION_COOKIE_SECURE must be 'true' or 'false', got '{}'",
                    other
                )))
            }
        };

        let login_path = vars
            .get("LOGIN_PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string());
        if !login_path.starts_with('/') {
            return Err(ConfigError::InvalidLoginPath(format!(
                "LOGIN_PATH must start with '/', got '{}'",
                login_path
            )));
        }

        Ok(Self {
            jwks_url,
            auth_api_url,
            jwks_timeout,
            http_timeout,
            cookie_max_age,
            cookie_secure,
            login_path,
        })
    }
}

fn parse_timeout(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidTimeout(format!(
            "{} must be a valid integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidTimeout(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }

    if value > MAX_HTTP_TIMEOUT.as_secs() {
        return Err(ConfigError::InvalidTimeout(format!(
            "{} must not exceed {} seconds, got {}",
            name,
            MAX_HTTP_TIMEOUT.as_secs(),
            value
        )));
    }

    Ok(Duration::from_secs(value))
}
