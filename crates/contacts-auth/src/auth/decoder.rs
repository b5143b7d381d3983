//! Unverified decoding of compact tokens.
//!
//! Splits a compact token into its header and payload without checking the
//! signature. The result is only used to pick a signing key and to pre-read
//! claims; it is never an authoritative identity.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any decoding
//! - The signature segment is not inspected here
//! - Nothing returned by [`decode`] may be trusted until the signature
//!   has been verified against a key fetched from the JWKS

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum accepted token size in bytes (8KB).
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Reasons a token could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token exceeds maximum size")]
    TooLarge,

    #[error("token must have three segments, found {0}")]
    SegmentCount(usize),

    #[error("{0} segment is not valid base64url")]
    Base64(&'static str),

    #[error("{0} segment is not a JSON object")]
    Json(&'static str),

    #[error("header has no string 'alg'")]
    MissingAlgorithm,

    #[error("header 'kid' is not a string")]
    InvalidKeyId,
}

/// Token header, decoded without trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedHeader {
    /// Declared signing algorithm (e.g. `RS256`).
    pub algorithm: String,

    /// Declared signing key id.
    pub key_id: Option<String>,
}

/// Audience claim: a single string, a list, or any other non-null value
/// kept as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
    Other(Value),
}

impl Audience {
    /// True when the claim counts as set.
    ///
    /// Only an empty string, `false` and `0` count as unset. Any array,
    /// including an empty one, and any object count as set.
    pub fn is_declared(&self) -> bool {
        match self {
            Audience::Single(aud) => !aud.is_empty(),
            Audience::Many(_) => true,
            Audience::Other(Value::Bool(flag)) => *flag,
            Audience::Other(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Audience::Other(Value::Null) => false,
            Audience::Other(_) => true,
        }
    }
}

/// Token payload, decoded without trust.
#[derive(Debug, Clone, PartialEq)]
pub struct UnverifiedPayload {
    /// `aud` claim.
    pub audience: Option<Audience>,

    /// `exp` claim in Unix epoch seconds.
    pub expires_at: Option<i64>,

    /// Every claim of the payload, passed through untouched.
    pub claims: Map<String, Value>,
}

impl UnverifiedPayload {
    /// Build from a claims object, extracting the claims the verifier reads.
    pub fn from_claims(claims: Map<String, Value>) -> Self {
        Self {
            audience: claims.get("aud").and_then(audience_from_value),
            expires_at: claims.get("exp").and_then(epoch_seconds),
            claims,
        }
    }
}

/// Decode a compact token into its unverified header and payload.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the token is oversized, does not have
/// exactly three segments, or its header/payload are not base64url-encoded
/// JSON objects. The header must declare a string `alg`.
pub fn decode(raw: &str) -> Result<(UnverifiedHeader, UnverifiedPayload), DecodeError> {
    if raw.len() > MAX_TOKEN_SIZE_BYTES {
        tracing::debug!(
            target: "contacts.auth.decoder",
            token_size = raw.len(),
            max_size = MAX_TOKEN_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(DecodeError::TooLarge);
    }

    let mut segments = raw.split('.');
    let (Some(header_part), Some(payload_part), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        let count = raw.split('.').count();
        tracing::debug!(target: "contacts.auth.decoder", segments = count, "Token rejected: invalid compact format");
        return Err(DecodeError::SegmentCount(count));
    };

    let header = decode_object(header_part, "header")?;
    let payload = decode_object(payload_part, "payload")?;

    let algorithm = header
        .get("alg")
        .and_then(Value::as_str)
        .filter(|alg| !alg.is_empty())
        .ok_or(DecodeError::MissingAlgorithm)?
        .to_string();

    let key_id = match header.get("kid") {
        None | Some(Value::Null) => None,
        Some(Value::String(kid)) => Some(kid.clone()),
        Some(_) => return Err(DecodeError::InvalidKeyId),
    };

    Ok((
        UnverifiedHeader { algorithm, key_id },
        UnverifiedPayload::from_claims(payload),
    ))
}

fn decode_object(segment: &str, name: &'static str) -> Result<Map<String, Value>, DecodeError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "contacts.auth.decoder", segment = name, error = %e, "Failed to decode token segment base64");
        DecodeError::Base64(name)
    })?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DecodeError::Json(name)),
        Err(e) => {
            tracing::debug!(target: "contacts.auth.decoder", segment = name, error = %e, "Failed to parse token segment JSON");
            Err(DecodeError::Json(name))
        }
    }
}

fn audience_from_value(value: &Value) -> Option<Audience> {
    match value {
        Value::String(aud) => Some(Audience::Single(aud.clone())),
        Value::Array(items) => Some(Audience::Many(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )),
        Value::Null => None,
        other => Some(Audience::Other(other.clone())),
    }
}

/// Read a NumericDate claim. Fractional seconds are truncated.
pub(crate) fn epoch_seconds(value: &Value) -> Option<i64> {
    if let Some(secs) = value.as_i64() {
        return Some(secs);
    }
    let secs = value.as_f64()?;
    // Safe cast: float-to-int `as` saturates and maps NaN to 0
    #[allow(clippy::cast_possible_truncation)]
    let truncated = secs.trunc() as i64;
    Some(truncated)
}
