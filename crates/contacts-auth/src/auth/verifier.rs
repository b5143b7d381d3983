//! Token verification.
//!
//! Turns the raw session tokens of a request into either a verified identity
//! or an [`ErrorCode`].
//!
//! # Verification Steps
//!
//! Steps run in this order and stop at the first failure:
//!
//! 1. Access token present and non-empty
//! 2. Token decodes (unverified) into header and payload
//! 3. Payload declares no audience
//! 4. Signing key for the header's `kid` resolves through the key ring
//! 5. Signature verifies with the header's algorithm and the fetched key
//! 6. Verified `exp` is present and not in the past
//!
//! # Security
//!
//! - The unverified header only selects the key; the signature check is what
//!   makes that selection trustworthy
//! - Expiry is judged only after the signature has been verified
//! - Claim validation inside the JWT library is disabled so that step 5 judges
//!   the signature alone and step 6 owns expiry

use crate::auth::decoder::{self, epoch_seconds, Audience};
use crate::auth::key_ring::{KeyMaterial, KeyRing, SigningKey};
use crate::credentials::CredentialPair;
use crate::errors::{AuthError, ErrorCode, KeyRetrievalFailure};
use crate::session::SessionTokens;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

/// Point in the verification state machine a request has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    /// Nothing checked yet.
    Start,
    /// Token decoded and screened; waiting on the key ring.
    KeyLookupPending,
    /// Key resolved; signature not yet verified.
    KeyResolved,
    /// Signature verified; expiry not yet accepted.
    SignatureChecked,
    /// Verified expiry checked.
    ExpiryChecked,
}

impl VerificationStage {
    /// Stage a verification stopped at when it was rejected with `code`.
    pub fn at_rejection(code: ErrorCode) -> Self {
        match code {
            ErrorCode::MissingToken | ErrorCode::MalformedToken | ErrorCode::AudienceRejected => {
                VerificationStage::Start
            }
            ErrorCode::KeyRetrievalFailed(_) => VerificationStage::KeyLookupPending,
            ErrorCode::SignatureInvalid => VerificationStage::KeyResolved,
            ErrorCode::Expired => VerificationStage::SignatureChecked,
        }
    }
}

/// An identity whose access token passed every verification step.
///
/// Only the verifier can construct one.
#[derive(Clone)]
pub struct VerifiedIdentity {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    expires_at: i64,
    claims: Map<String, Value>,
    renewed: bool,
}

impl VerifiedIdentity {
    /// The verified access token, as read from the request.
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// The companion refresh token, if the request carried one.
    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// Verified expiry in Unix epoch seconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Verified claims of the access token.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Convenience accessor for `sub`.
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }

    /// True when the tokens were obtained through the renewal hook and the
    /// session cookies need rewriting.
    pub fn renewed(&self) -> bool {
        self.renewed
    }
}

/// Claims are withheld from Debug output since they identify the user.
impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("claims", &"[REDACTED]")
            .field("renewed", &self.renewed)
            .finish()
    }
}

/// Result of verifying a request's session.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated(VerifiedIdentity),
    Unauthenticated(ErrorCode),
}

impl AuthOutcome {
    /// Convert into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the rejection code for `Unauthenticated` outcomes.
    pub fn into_result(self) -> Result<VerifiedIdentity, ErrorCode> {
        match self {
            AuthOutcome::Authenticated(identity) => Ok(identity),
            AuthOutcome::Unauthenticated(code) => Err(code),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }
}

/// Extension point for renewing an expired access token.
///
/// Consulted only when a validly signed access token has expired and the
/// request carries a refresh token. A returned pair is verified like any
/// other token; the hook is never consulted twice for one request.
#[async_trait]
pub trait TokenRenewal: Send + Sync {
    /// Exchange `refresh_token` for a new token pair, or `None` to decline.
    async fn on_expired_with_refresh(
        &self,
        refresh_token: &SecretString,
    ) -> Result<Option<CredentialPair>, AuthError>;
}

/// Claims that passed signature and expiry checks.
struct CheckedToken {
    claims: Map<String, Value>,
    expires_at: i64,
}

/// Verifies session tokens against keys from a [`KeyRing`].
pub struct TokenVerifier {
    /// Source of signing keys.
    key_ring: Arc<dyn KeyRing>,

    /// Optional renewal hook for expired tokens.
    renewal: Option<Arc<dyn TokenRenewal>>,
}

impl TokenVerifier {
    /// Create a verifier using `key_ring` for key lookups.
    pub fn new(key_ring: Arc<dyn KeyRing>) -> Self {
        Self {
            key_ring,
            renewal: None,
        }
    }

    /// Install a renewal hook for expired tokens.
    #[must_use]
    pub fn with_renewal(mut self, renewal: Arc<dyn TokenRenewal>) -> Self {
        self.renewal = Some(renewal);
        self
    }

    /// Verify a request's session tokens against the current time.
    pub async fn verify(&self, session: &SessionTokens) -> AuthOutcome {
        self.verify_at(session, chrono::Utc::now().timestamp()).await
    }

    /// Verify a request's session tokens against an explicit `now`
    /// (Unix epoch seconds).
    #[instrument(skip_all)]
    pub async fn verify_at(&self, session: &SessionTokens, now: i64) -> AuthOutcome {
        let Some(access_token) = session
            .access_token
            .as_ref()
            .filter(|token| !token.expose_secret().is_empty())
        else {
            return reject(ErrorCode::MissingToken);
        };

        match self.check(access_token.expose_secret(), now).await {
            Ok(checked) => {
                tracing::debug!(target: "contacts.auth.verifier", stage = ?VerificationStage::ExpiryChecked, "Token verified");
                AuthOutcome::Authenticated(VerifiedIdentity {
                    access_token: access_token.clone(),
                    refresh_token: session.refresh_token.clone(),
                    expires_at: checked.expires_at,
                    claims: checked.claims,
                    renewed: false,
                })
            }
            Err(ErrorCode::Expired) => match (&self.renewal, &session.refresh_token) {
                (Some(renewal), Some(refresh_token)) => {
                    self.renew(renewal.as_ref(), refresh_token, now).await
                }
                _ => reject(ErrorCode::Expired),
            },
            Err(code) => reject(code),
        }
    }

    /// Run steps 2-6 on a non-empty token.
    async fn check(&self, raw: &str, now: i64) -> Result<CheckedToken, ErrorCode> {
        let (header, payload) = decoder::decode(raw).map_err(|e| {
            tracing::debug!(target: "contacts.auth.verifier", error = %e, "Token rejected: malformed");
            ErrorCode::MalformedToken
        })?;

        // Any declared audience is rejected until audience policy is settled
        if payload.audience.as_ref().is_some_and(Audience::is_declared) {
            tracing::debug!(target: "contacts.auth.verifier", "Token rejected: audience declared");
            return Err(ErrorCode::AudienceRejected);
        }

        let Some(key_id) = header.key_id.as_deref().filter(|kid| !kid.is_empty()) else {
            tracing::debug!(target: "contacts.auth.verifier", "Token rejected: no key id");
            return Err(ErrorCode::KeyRetrievalFailed(
                KeyRetrievalFailure::UnknownKeyId,
            ));
        };

        let key = self.key_ring.signing_key(key_id).await.map_err(|failure| {
            tracing::debug!(
                target: "contacts.auth.verifier",
                kid = %key_id,
                failure = %failure,
                "Token rejected: signing key unavailable"
            );
            ErrorCode::KeyRetrievalFailed(failure)
        })?;

        let claims = verify_signature(raw, &header.algorithm, &key)?;
        tracing::trace!(target: "contacts.auth.verifier", kid = %key_id, stage = ?VerificationStage::SignatureChecked, "Signature verified");

        // Only the verified claims decide expiry
        let expires_at = claims.get("exp").and_then(epoch_seconds);
        match expires_at {
            Some(exp) if exp >= now => Ok(CheckedToken {
                claims,
                expires_at: exp,
            }),
            _ => {
                tracing::debug!(
                    target: "contacts.auth.verifier",
                    exp = ?expires_at,
                    now = now,
                    "Token rejected: expired or without expiry"
                );
                Err(ErrorCode::Expired)
            }
        }
    }

    async fn renew(
        &self,
        renewal: &dyn TokenRenewal,
        refresh_token: &SecretString,
        now: i64,
    ) -> AuthOutcome {
        let pair = match renewal.on_expired_with_refresh(refresh_token).await {
            Ok(Some(pair)) => pair,
            Ok(None) => return AuthOutcome::Unauthenticated(ErrorCode::Expired),
            Err(e) => {
                tracing::warn!(target: "contacts.auth.verifier", error = %e, "Token renewal failed");
                return AuthOutcome::Unauthenticated(ErrorCode::Expired);
            }
        };

        match self.check(pair.access_token.expose_secret(), now).await {
            Ok(checked) => {
                tracing::info!(target: "contacts.auth.verifier", "Expired token renewed");
                AuthOutcome::Authenticated(VerifiedIdentity {
                    access_token: pair.access_token,
                    refresh_token: Some(pair.refresh_token),
                    expires_at: checked.expires_at,
                    claims: checked.claims,
                    renewed: true,
                })
            }
            Err(code) => {
                tracing::warn!(target: "contacts.auth.verifier", code = %code, "Renewed token failed verification");
                AuthOutcome::Unauthenticated(code)
            }
        }
    }
}

fn reject(code: ErrorCode) -> AuthOutcome {
    tracing::debug!(
        target: "contacts.auth.verifier",
        code = %code,
        stage = ?VerificationStage::at_rejection(code),
        "Token rejected"
    );
    AuthOutcome::Unauthenticated(code)
}

/// Verify the token signature and return its claims.
///
/// Synchronous: the key has already been resolved.
fn verify_signature(
    raw: &str,
    declared_alg: &str,
    key: &SigningKey,
) -> Result<Map<String, Value>, ErrorCode> {
    let algorithm = Algorithm::from_str(declared_alg).map_err(|e| {
        tracing::debug!(target: "contacts.auth.verifier", alg = %declared_alg, error = %e, "Unsupported token algorithm");
        ErrorCode::SignatureInvalid
    })?;

    if let Some(key_alg) = &key.algorithm {
        if key_alg != declared_alg {
            tracing::warn!(
                target: "contacts.auth.verifier",
                kid = %key.key_id,
                key_alg = %key_alg,
                token_alg = %declared_alg,
                "Token algorithm does not match JWK algorithm"
            );
            return Err(ErrorCode::SignatureInvalid);
        }
    }

    let decoding_key = decoding_key(&key.material).map_err(|e| {
        tracing::error!(target: "contacts.auth.verifier", kid = %key.key_id, error = %e, "Invalid public key encoding");
        ErrorCode::SignatureInvalid
    })?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = jsonwebtoken::decode::<Map<String, Value>>(raw, &decoding_key, &validation)
        .map_err(|e| {
            tracing::debug!(target: "contacts.auth.verifier", error = %e, stage = ?VerificationStage::KeyResolved, "Token signature verification failed");
            ErrorCode::SignatureInvalid
        })?;

    Ok(token_data.claims)
}

fn decoding_key(material: &KeyMaterial) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
    match material {
        KeyMaterial::Rsa { n, e } => DecodingKey::from_rsa_components(n, e),
        KeyMaterial::Ec { x, y, .. } => DecodingKey::from_ec_components(x, y),
        KeyMaterial::Ed25519 { x } => DecodingKey::from_ed_components(x),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use auth_test_utils::{TestKeypair, TestTokenBuilder};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_000;

    /// Key ring serving fixed keys and counting lookups.
    struct StaticKeyRing {
        keys: Vec<SigningKey>,
        lookups: AtomicUsize,
    }

    impl StaticKeyRing {
        fn new(keypairs: &[&TestKeypair]) -> Self {
            let keys = keypairs
                .iter()
                .map(|kp| {
                    let jwk = serde_json::from_value(kp.jwk_json()).unwrap();
                    SigningKey::from_jwk(&jwk).unwrap()
                })
                .collect();
            Self {
                keys,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KeyRing for StaticKeyRing {
        async fn signing_key(&self, key_id: &str) -> Result<SigningKey, KeyRetrievalFailure> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.keys
                .iter()
                .find(|k| k.key_id == key_id)
                .cloned()
                .ok_or(KeyRetrievalFailure::UnknownKeyId)
        }
    }

    struct UnavailableKeyRing;

    #[async_trait]
    impl KeyRing for UnavailableKeyRing {
        async fn signing_key(&self, _key_id: &str) -> Result<SigningKey, KeyRetrievalFailure> {
            Err(KeyRetrievalFailure::Unavailable)
        }
    }

    fn session(access: &str, refresh: Option<&str>) -> SessionTokens {
        SessionTokens::new(
            Some(SecretString::from(access)),
            refresh.map(SecretString::from),
        )
    }

    fn verifier_for(keypairs: &[&TestKeypair]) -> (TokenVerifier, Arc<StaticKeyRing>) {
        let ring = Arc::new(StaticKeyRing::new(keypairs));
        (TokenVerifier::new(ring.clone()), ring)
    }

    #[tokio::test]
    async fn test_valid_token_is_authenticated() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW + 60).build());

        let outcome = verifier.verify_at(&session(&token, Some("r1")), NOW).await;

        let identity = outcome.into_result().unwrap();
        assert_eq!(identity.access_token().expose_secret(), token);
        assert_eq!(identity.refresh_token().unwrap().expose_secret(), "r1");
        assert_eq!(identity.expires_at(), NOW + 60);
        assert_eq!(identity.subject(), Some("test-subject"));
        assert!(!identity.renewed());
    }

    #[tokio::test]
    async fn test_missing_and_empty_token() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, ring) = verifier_for(&[&keypair]);

        let outcome = verifier.verify_at(&SessionTokens::default(), NOW).await;
        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::MissingToken)
        ));

        let outcome = verifier.verify_at(&session("", None), NOW).await;
        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::MissingToken)
        ));

        assert_eq!(ring.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let (verifier, ring) = verifier_for(&[]);

        let outcome = verifier.verify_at(&session("not.a.valid.jwt", None), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::MalformedToken)
        ));
        assert_eq!(ring.lookups.load(Ordering::SeqCst), 0);
    }

    // Policy under review: any declared audience is rejected outright.
    #[tokio::test]
    async fn test_audience_is_rejected_before_key_lookup() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, ring) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(
            &TestTokenBuilder::new()
                .expires_at(NOW + 60)
                .with_audience("contacts-api")
                .build(),
        );

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::AudienceRejected)
        ));
        assert_eq!(ring.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_audience_is_not_rejected() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(
            &TestTokenBuilder::new()
                .expires_at(NOW + 60)
                .with_audience("")
                .build(),
        );

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;
        assert!(outcome.is_authenticated());
    }

    #[tokio::test]
    async fn test_audience_array_is_rejected() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, ring) = verifier_for(&[&keypair]);

        for audiences in [&["contacts-api", "admin"][..], &[][..]] {
            let token = keypair.sign_token(
                &TestTokenBuilder::new()
                    .expires_at(NOW + 60)
                    .with_audiences(audiences)
                    .build(),
            );

            let outcome = verifier.verify_at(&session(&token, None), NOW).await;
            assert!(
                matches!(
                    outcome,
                    AuthOutcome::Unauthenticated(ErrorCode::AudienceRejected)
                ),
                "aud {audiences:?} should be rejected"
            );
        }
        assert_eq!(ring.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_string_audience_is_rejected_when_set() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, ring) = verifier_for(&[&keypair]);

        for aud in [json!(1), json!(true), json!({"x": 1})] {
            let token = keypair.sign_token(
                &TestTokenBuilder::new()
                    .expires_at(NOW + 60)
                    .with_claim("aud", aud.clone())
                    .build(),
            );

            let outcome = verifier.verify_at(&session(&token, None), NOW).await;
            assert!(
                matches!(
                    outcome,
                    AuthOutcome::Unauthenticated(ErrorCode::AudienceRejected)
                ),
                "aud {aud} should be rejected"
            );
        }
        assert_eq!(ring.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unset_audience_values_are_not_rejected() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);

        for aud in [json!(0), json!(false), json!(null)] {
            let token = keypair.sign_token(
                &TestTokenBuilder::new()
                    .expires_at(NOW + 60)
                    .with_claim("aud", aud.clone())
                    .build(),
            );

            let outcome = verifier.verify_at(&session(&token, None), NOW).await;
            assert!(outcome.is_authenticated(), "aud {aud} should be accepted");
        }
    }

    #[test]
    fn test_rejection_stage_reflects_progress() {
        assert_eq!(
            VerificationStage::at_rejection(ErrorCode::AudienceRejected),
            VerificationStage::Start
        );
        assert_eq!(
            VerificationStage::at_rejection(ErrorCode::KeyRetrievalFailed(
                KeyRetrievalFailure::Unavailable
            )),
            VerificationStage::KeyLookupPending
        );
        assert_eq!(
            VerificationStage::at_rejection(ErrorCode::SignatureInvalid),
            VerificationStage::KeyResolved
        );
        assert_eq!(
            VerificationStage::at_rejection(ErrorCode::Expired),
            VerificationStage::SignatureChecked
        );
    }

    #[tokio::test]
    async fn test_missing_kid_is_unknown_key() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token_without_kid(&TestTokenBuilder::new().build());

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::KeyRetrievalFailed(
                KeyRetrievalFailure::UnknownKeyId
            ))
        ));
    }

    #[tokio::test]
    async fn test_key_ring_failure_is_propagated() {
        let keypair = TestKeypair::new(1, "k1");
        let verifier = TokenVerifier::new(Arc::new(UnavailableKeyRing));
        let token = keypair.sign_token(&TestTokenBuilder::new().build());

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::KeyRetrievalFailed(
                KeyRetrievalFailure::Unavailable
            ))
        ));
    }

    #[tokio::test]
    async fn test_token_signed_by_other_key_under_same_kid() {
        let published = TestKeypair::new(1, "k1");
        let forger = TestKeypair::new(2, "k1");
        let (verifier, _) = verifier_for(&[&published]);
        let token = forger.sign_token(&TestTokenBuilder::new().expires_at(NOW + 60).build());

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_tampered_payload_is_signature_invalid() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW + 60).build());
        let other = keypair.sign_token(
            &TestTokenBuilder::new()
                .for_user("mallory")
                .expires_at(NOW + 60)
                .build(),
        );

        // Splice the payload of one token onto the signature of another
        let (header, rest) = token.split_once('.').unwrap();
        let (_, signature) = rest.split_once('.').unwrap();
        let (_, other_rest) = other.split_once('.').unwrap();
        let (other_payload, _) = other_rest.split_once('.').unwrap();
        let tampered = format!("{header}.{other_payload}.{signature}");

        let outcome = verifier.verify_at(&session(&tampered, None), NOW).await;
        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_unknown_algorithm_is_signature_invalid() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = TestTokenBuilder::new()
            .expires_at(NOW + 60)
            .unsigned_token(r#"{"alg":"none","kid":"k1"}"#);

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;
        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_algorithm_mismatch_with_jwk_is_signature_invalid() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        // JWK declares EdDSA; header claims HS256
        let token = TestTokenBuilder::new()
            .expires_at(NOW + 60)
            .unsigned_token(r#"{"alg":"HS256","kid":"k1"}"#);

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;
        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_with_valid_signature() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW - 10).build());

        let outcome = verifier.verify_at(&session(&token, Some("r1")), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::Expired)
        ));
    }

    #[tokio::test]
    async fn test_missing_exp_is_expired() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(&TestTokenBuilder::new().without_expiry().build());

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::Expired)
        ));
    }

    #[tokio::test]
    async fn test_exp_equal_to_now_is_still_valid() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW).build());

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;
        assert!(outcome.is_authenticated());

        let outcome = verifier.verify_at(&session(&token, None), NOW + 1).await;
        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::Expired)
        ));
    }

    #[tokio::test]
    async fn test_signature_checked_before_expiry() {
        // An expired token with a bad signature reports the signature failure
        let published = TestKeypair::new(1, "k1");
        let forger = TestKeypair::new(2, "k1");
        let (verifier, _) = verifier_for(&[&published]);
        let token = forger.sign_token(&TestTokenBuilder::new().expires_at(NOW - 10).build());

        let outcome = verifier.verify_at(&session(&token, None), NOW).await;
        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_verification_is_idempotent() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW + 60).build());
        let session = session(&token, None);

        let first = verifier.verify_at(&session, NOW).await.into_result().unwrap();
        let second = verifier.verify_at(&session, NOW).await.into_result().unwrap();

        assert_eq!(
            first.access_token().expose_secret(),
            second.access_token().expose_secret()
        );
    }

    #[tokio::test]
    async fn test_identity_debug_redacts() {
        let keypair = TestKeypair::new(1, "k1");
        let (verifier, _) = verifier_for(&[&keypair]);
        let token = keypair.sign_token(
            &TestTokenBuilder::new()
                .for_user("secret-user-id")
                .expires_at(NOW + 60)
                .build(),
        );

        let identity = verifier
            .verify_at(&session(&token, Some("refresh-secret")), NOW)
            .await
            .into_result()
            .unwrap();
        let debug_str = format!("{identity:?}");

        assert!(!debug_str.contains("secret-user-id"));
        assert!(!debug_str.contains("refresh-secret"));
        assert!(!debug_str.contains(&token));
    }

    // =========================================================================
    // Renewal hook
    // =========================================================================

    struct FixedRenewal {
        pair: Option<CredentialPair>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRenewal for FixedRenewal {
        async fn on_expired_with_refresh(
            &self,
            refresh_token: &SecretString,
        ) -> Result<Option<CredentialPair>, AuthError> {
            assert_eq!(refresh_token.expose_secret(), "r1");
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pair.clone())
        }
    }

    #[tokio::test]
    async fn test_renewal_hook_replaces_expired_token() {
        let keypair = TestKeypair::new(1, "k1");
        let expired = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW - 10).build());
        let fresh = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW + 600).build());
        let renewal = Arc::new(FixedRenewal {
            pair: Some(CredentialPair {
                access_token: SecretString::from(fresh.clone()),
                refresh_token: SecretString::from("r2"),
            }),
            calls: AtomicUsize::new(0),
        });
        let (verifier, _) = verifier_for(&[&keypair]);
        let verifier = verifier.with_renewal(renewal.clone());

        let identity = verifier
            .verify_at(&session(&expired, Some("r1")), NOW)
            .await
            .into_result()
            .unwrap();

        assert!(identity.renewed());
        assert_eq!(identity.access_token().expose_secret(), fresh);
        assert_eq!(identity.refresh_token().unwrap().expose_secret(), "r2");
        assert_eq!(renewal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_renewal_hook_not_consulted_twice() {
        let keypair = TestKeypair::new(1, "k1");
        let expired = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW - 10).build());
        let also_expired =
            keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW - 5).build());
        let renewal = Arc::new(FixedRenewal {
            pair: Some(CredentialPair {
                access_token: SecretString::from(also_expired),
                refresh_token: SecretString::from("r1"),
            }),
            calls: AtomicUsize::new(0),
        });
        let (verifier, _) = verifier_for(&[&keypair]);
        let verifier = verifier.with_renewal(renewal.clone());

        let outcome = verifier.verify_at(&session(&expired, Some("r1")), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::Expired)
        ));
        assert_eq!(renewal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_renewal_hook_requires_refresh_token() {
        let keypair = TestKeypair::new(1, "k1");
        let expired = keypair.sign_token(&TestTokenBuilder::new().expires_at(NOW - 10).build());
        let renewal = Arc::new(FixedRenewal {
            pair: None,
            calls: AtomicUsize::new(0),
        });
        let (verifier, _) = verifier_for(&[&keypair]);
        let verifier = verifier.with_renewal(renewal.clone());

        let outcome = verifier.verify_at(&session(&expired, None), NOW).await;

        assert!(matches!(
            outcome,
            AuthOutcome::Unauthenticated(ErrorCode::Expired)
        ));
        assert_eq!(renewal.calls.load(Ordering::SeqCst), 0);
    }
}
