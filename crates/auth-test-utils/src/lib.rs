//! # Auth Test Utilities
//!
//! Shared test utilities for the `contacts-auth` crate.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys, throwaway ES256 keys)
//! - Claims builders (`TestTokenBuilder`)
//! - wiremock helpers for the JWKS and credential endpoints
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let keypair = TestKeypair::new(1, "test-key-01");
//!     let backend = MockBackend::start().await;
//!     backend.mount_jwks(&[keypair.jwk_json()]).await;
//!
//!     let token = keypair.sign_token(&TestTokenBuilder::new().for_user("alice").build());
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_backend;
pub mod token_builders;

pub use crypto_fixtures::*;
pub use mock_backend::*;
pub use token_builders::*;
