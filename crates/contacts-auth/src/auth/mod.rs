//! Token verification.
//!
//! # Components
//!
//! - `decoder` - Unverified structural decoding of compact tokens
//! - `key_ring` - Signing key lookup with a per-key-id JWKS cache
//! - `verifier` - Signature and expiry verification

pub mod decoder;
pub mod key_ring;
pub mod verifier;

pub use key_ring::{JwksKeyRing, KeyRing, SigningKey};
pub use verifier::{AuthOutcome, TokenRenewal, TokenVerifier, VerificationStage, VerifiedIdentity};
