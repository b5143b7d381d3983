//! Session middleware for protected routes.
//!
//! Verifies the session cookies, redirects to the login screen on failure,
//! and injects the [`VerifiedIdentity`] into request extensions for handlers.

use crate::auth::VerifiedIdentity;
use crate::cookies::append_set_cookies;
use crate::flow::AuthenticationFlow;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

/// Session middleware.
///
/// # Response
///
/// - `302 Found` to the login path if the session does not verify
/// - Otherwise the handler's response, with `Set-Cookie` headers appended
///   when the tokens were renewed during verification
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/contacts", get(list_contacts))
///     .layer(middleware::from_fn_with_state(flow.clone(), require_session));
/// ```
#[instrument(skip_all, name = "contacts.middleware.session")]
pub async fn require_session(
    State(flow): State<Arc<AuthenticationFlow>>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = match flow.require_or_redirect(req.headers()).await {
        Ok(identity) => identity,
        Err(redirect) => return redirect.into_response(),
    };

    let renewal_cookies = flow.renewal_cookies(&identity);
    if !renewal_cookies.is_empty() {
        tracing::debug!(target: "contacts.middleware", "Writing renewed session cookies");
    }

    req.extensions_mut().insert(identity);

    let mut response = next.run(req).await;
    append_set_cookies(response.headers_mut(), &renewal_cookies);
    response
}

/// Extension trait for reading the verified identity from a request.
pub trait IdentityExt {
    /// Returns `None` if the session middleware was not applied.
    fn identity(&self) -> Option<&VerifiedIdentity>;
}

impl<B> IdentityExt for axum::extract::Request<B> {
    fn identity(&self) -> Option<&VerifiedIdentity> {
        self.extensions().get::<VerifiedIdentity>()
    }
}
