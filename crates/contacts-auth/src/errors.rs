//! Authentication error types.
//!
//! Verification failures are collapsed into a single [`ErrorCode`] at the
//! verifier boundary. Callers never see the network or parse error that
//! caused a rejection; those are logged server-side.
//!
//! [`AuthError`] is what the throwing entry points and the login flow raise.
//! It maps to HTTP responses via the `IntoResponse` impl with deliberately
//! generic messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a signing key could not be produced for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRetrievalFailure {
    /// The JWKS endpoint answered but no key carries the requested id
    /// (or the token named no key id at all).
    UnknownKeyId,

    /// The JWKS endpoint could not be reached, timed out, returned a
    /// non-success status, or returned an unparsable body.
    Unavailable,

    /// A key with the requested id exists but its type or components are
    /// not usable for signature verification.
    UnusableKey,
}

impl KeyRetrievalFailure {
    /// Stable code used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            KeyRetrievalFailure::UnknownKeyId => "UNKNOWN_KEY_ID",
            KeyRetrievalFailure::Unavailable => "KEY_SOURCE_UNAVAILABLE",
            KeyRetrievalFailure::UnusableKey => "UNUSABLE_KEY",
        }
    }
}

impl fmt::Display for KeyRetrievalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a request is unauthenticated.
///
/// Each variant corresponds to the verification step that rejected the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// No access-token cookie, or an empty one.
    MissingToken,

    /// The token is not a well-formed compact token.
    MalformedToken,

    /// The token declares an audience.
    AudienceRejected,

    /// No signing key could be obtained for the token's key id.
    KeyRetrievalFailed(KeyRetrievalFailure),

    /// The signature does not verify against the fetched key.
    SignatureInvalid,

    /// The verified token has no expiry or has expired.
    Expired,
}

impl ErrorCode {
    /// Stable code used in logs, response bodies and soft-error markers.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingToken => "MISSING_TOKEN",
            ErrorCode::MalformedToken => "MALFORMED_TOKEN",
            ErrorCode::AudienceRejected => "AUDIENCE_REJECTED",
            ErrorCode::KeyRetrievalFailed(_) => "KEY_RETRIEVAL_FAILED",
            ErrorCode::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorCode::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::KeyRetrievalFailed(cause) => write!(f, "{}({cause})", self.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Errors raised by the authentication flow.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The request carries no valid identity.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(ErrorCode),

    /// The credential endpoint refused the credentials or could not be reached.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The credential endpoint answered with an unusable token pair.
    #[error("Invalid credential response: {0}")]
    InvalidCredentialResponse(String),
}

impl AuthError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Unauthenticated(_) | AuthError::InvalidCredentials => 401,
            AuthError::InvalidCredentialResponse(_) => 502,
        }
    }

    /// The verification error code, when this error came from token verification.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            AuthError::Unauthenticated(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<ErrorCode> for AuthError {
    fn from(code: ErrorCode) -> Self {
        AuthError::Unauthenticated(code)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::Unauthenticated(code) => {
                tracing::debug!(target: "contacts.errors", code = %code, "Request unauthenticated");
                (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHENTICATED",
                    "The session is invalid or expired".to_string(),
                )
            }
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid credentials".to_string(),
            ),
            AuthError::InvalidCredentialResponse(reason) => {
                // Log actual reason server-side
                tracing::warn!(target: "contacts.errors", reason = %reason, "Credential endpoint returned unusable response");
                (
                    StatusCode::BAD_GATEWAY,
                    "INVALID_CREDENTIAL_RESPONSE",
                    "Authentication service returned an invalid response".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        });

        let mut response = (status, body).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(value) = "Cookie realm=\"contacts\"".parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::WWW_AUTHENTICATE, value);
            }
        }

        response
    }
}
