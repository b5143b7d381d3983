//! Session authentication for the contacts web frontend.
//!
//! Requests carry a signed access token and an opaque refresh token in
//! cookies. This crate turns those cookies into either a verified identity or
//! a typed failure, and produces the cookie writes for login and logout.
//!
//! # Modules
//!
//! - `auth` - Token decoding, signing key lookup, and verification
//! - `config` - Configuration from environment
//! - `cookies` - `Set-Cookie` instructions for the session cookies
//! - `credentials` - Email/password exchange with the token-issuing backend
//! - `errors` - Error codes and HTTP status mapping
//! - `flow` - Redirect, soft-error, and raising guards plus login/logout
//! - `middleware` - axum middleware for protected routes
//! - `session` - Token extraction from request cookies
//!
//! # Example
//!
//! ```rust,ignore
//! let config = AuthConfig::from_env()?;
//! let flow = Arc::new(AuthenticationFlow::from_config(&config));
//!
//! let app = Router::new()
//!     .route("/contacts", get(list_contacts))
//!     .layer(axum::middleware::from_fn_with_state(flow.clone(), require_session));
//! ```

pub mod auth;
pub mod config;
pub mod cookies;
pub mod credentials;
pub mod errors;
pub mod flow;
pub mod middleware;
pub mod session;

pub use auth::{AuthOutcome, TokenRenewal, TokenVerifier, VerifiedIdentity};
pub use config::AuthConfig;
pub use errors::{AuthError, ErrorCode, KeyRetrievalFailure};
pub use flow::{AuthenticationFlow, LoginRedirect, SoftAuth};
pub use middleware::{require_session, IdentityExt};
