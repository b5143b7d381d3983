//! Signing key retrieval and caching.
//!
//! [`JwksKeyRing`] fetches the backend's JWKS document on a cache miss, picks
//! the key whose `kid` matches, and keeps it for the lifetime of the ring.
//!
//! # Caching
//!
//! - Entries are added on first lookup and are never evicted or replaced
//! - A cache hit never touches the network
//! - Two concurrent misses for the same key id may both fetch; the first
//!   insert wins and both callers receive the cached entry
//! - A failed or timed-out fetch only fails the lookup that issued it

use crate::errors::KeyRetrievalFailure;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

/// JSON Web Key as published by the JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC" or "OKP").
    pub kty: String,

    /// Key ID. Entries without one can never be selected.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is intended for.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig").
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus.
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent.
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate, or the OKP public key.
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate.
    #[serde(default)]
    pub y: Option<String>,
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// Public key components, base64url encoded as published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    Rsa { n: String, e: String },
    Ec { curve: String, x: String, y: String },
    Ed25519 { x: String },
}

/// A public key able to verify token signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKey {
    /// Key id the key was published under.
    pub key_id: String,

    /// Algorithm declared by the JWK, if any.
    pub algorithm: Option<String>,

    /// Public key components.
    pub material: KeyMaterial,
}

impl SigningKey {
    /// Convert a JWK into a signing key.
    ///
    /// Returns `None` when the JWK has no key id, an unsupported key type,
    /// or is missing the components its type requires.
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let key_id = jwk.kid.clone()?;

        let material = match jwk.kty.as_str() {
            "RSA" => KeyMaterial::Rsa {
                n: jwk.n.clone()?,
                e: jwk.e.clone()?,
            },
            "EC" => KeyMaterial::Ec {
                curve: jwk.crv.clone().unwrap_or_else(|| "P-256".to_string()),
                x: jwk.x.clone()?,
                y: jwk.y.clone()?,
            },
            "OKP" if jwk.crv.as_deref().unwrap_or("Ed25519") == "Ed25519" => {
                KeyMaterial::Ed25519 { x: jwk.x.clone()? }
            }
            _ => return None,
        };

        Some(Self {
            key_id,
            algorithm: jwk.alg.clone(),
            material,
        })
    }
}

/// Source of signing keys, looked up by key id.
///
/// The verifier only depends on this trait so tests can supply fakes.
#[async_trait]
pub trait KeyRing: Send + Sync {
    /// Resolve the signing key published under `key_id`.
    async fn signing_key(&self, key_id: &str) -> Result<SigningKey, KeyRetrievalFailure>;
}

/// Cached key with its fetch time.
struct CachedKey {
    key: SigningKey,
    fetched_at: Instant,
}

/// Key ring backed by a remote JWKS endpoint with a per-key-id cache.
pub struct JwksKeyRing {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Keys fetched so far, by key id.
    cache: Arc<RwLock<HashMap<String, CachedKey>>>,

    /// Timeout applied to each fetch.
    timeout: Duration,
}

impl JwksKeyRing {
    /// Create a key ring for `jwks_url` with the given fetch timeout.
    pub fn new(jwks_url: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "contacts.auth.key_ring", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    /// URL of the JWKS endpoint.
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Number of keys currently cached.
    pub async fn cached_key_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Fetch the JWKS document and select the entry for `key_id`.
    #[instrument(skip(self))]
    async fn fetch_key(&self, key_id: &str) -> Result<SigningKey, KeyRetrievalFailure> {
        tracing::debug!(target: "contacts.auth.key_ring", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "contacts.auth.key_ring", error = %e, timed_out = e.is_timeout(), "Failed to fetch JWKS");
                KeyRetrievalFailure::Unavailable
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "contacts.auth.key_ring",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(KeyRetrievalFailure::Unavailable);
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "contacts.auth.key_ring", error = %e, "Failed to parse JWKS response");
            KeyRetrievalFailure::Unavailable
        })?;

        tracing::info!(
            target: "contacts.auth.key_ring",
            key_count = jwks.keys.len(),
            "JWKS fetched"
        );

        let jwk = jwks
            .keys
            .iter()
            .find(|jwk| jwk.kid.as_deref() == Some(key_id))
            .ok_or_else(|| {
                tracing::warn!(target: "contacts.auth.key_ring", kid = %key_id, "Key not found in JWKS");
                KeyRetrievalFailure::UnknownKeyId
            })?;

        SigningKey::from_jwk(jwk).ok_or_else(|| {
            tracing::warn!(target: "contacts.auth.key_ring", kid = %key_id, kty = %jwk.kty, "JWK is not usable for verification");
            KeyRetrievalFailure::UnusableKey
        })
    }
}

#[async_trait]
impl KeyRing for JwksKeyRing {
    #[instrument(skip(self), fields(kid = %key_id))]
    async fn signing_key(&self, key_id: &str) -> Result<SigningKey, KeyRetrievalFailure> {
        // Check cache first
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(key_id) {
                tracing::debug!(
                    target: "contacts.auth.key_ring",
                    kid = %key_id,
                    age_secs = cached.fetched_at.elapsed().as_secs(),
                    "Signing key cache hit"
                );
                return Ok(cached.key.clone());
            }
        }

        let key = self.fetch_key(key_id).await?;

        // First insert wins so a key id never maps to two different keys
        let mut cache = self.cache.write().await;
        let cached = cache.entry(key_id.to_string()).or_insert_with(|| CachedKey {
            key,
            fetched_at: Instant::now(),
        });

        Ok(cached.key.clone())
    }
}
