//! Axum middleware adapters over the token verifier and the guard.
//!
//! Routing and handlers live outside this crate; these layers only bridge
//! the core types into a request pipeline: [`BearerAuth`] turns a bearer
//! token into [`SessionClaims`] request extensions, and [`RequireOrgRole`]
//! runs the guard against the token's organization context and attaches
//! the resolved [`OrgContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{middleware::from_fn, routing::get, Router};
//! use clubdesk::auth::{BearerAuth, RequireOrgRole};
//! use clubdesk::org::OrgRole;
//!
//! let bearer = BearerAuth::new(token_issuer);
//! let officers = RequireOrgRole::new(
//!     guard.clone(),
//!     vec![OrgRole::President, OrgRole::VicePresident],
//! );
//!
//! let app = Router::new()
//!     .route("/members", get(list_members))
//!     .layer(from_fn(move |req, next| {
//!         let officers = officers.clone();
//!         async move { officers.middleware(req, next).await }
//!     }))
//!     .layer(from_fn(move |req, next| {
//!         let bearer = bearer.clone();
//!         async move { bearer.middleware(req, next).await }
//!     }));
//! ```

use crate::auth::guard::{AuditSink, AuthorizationGuard};
use crate::auth::token::{SessionClaims, TokenIssuer};
use crate::error::{Error, Result};
use crate::org::storage::MembershipStore;
use crate::org::types::OrgRole;
use axum::{
    extract::Request, http::header::AUTHORIZATION, middleware::Next, response::Response,
};
use std::sync::Arc;

/// Layer that verifies the bearer token and stores the claims in request
/// extensions. Requests without a valid token are rejected.
#[derive(Clone)]
pub struct BearerAuth {
    verifier: TokenIssuer,
}

impl BearerAuth {
    #[must_use]
    pub fn new(verifier: TokenIssuer) -> Self {
        Self { verifier }
    }

    pub async fn middleware(&self, mut request: Request, next: Next) -> Result<Response> {
        let token = bearer_token(&request)?;
        let claims = self.verifier.verify(&token)?;
        request.extensions_mut().insert(claims);
        Ok(next.run(request).await)
    }
}

fn bearer_token(request: &Request) -> Result<String> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| Error::unauthorized("Missing authorization header"))?;
    header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| Error::unauthorized("Malformed authorization header"))
}

/// Layer that runs the authorization guard for the organization named in
/// the token claims and attaches the resolved
/// [`OrgContext`](crate::auth::guard::OrgContext) on success.
///
/// Handlers whose organization comes from the request path instead should
/// call [`AuthorizationGuard::authorize`] directly with that id.
pub struct RequireOrgRole<S, A = ()> {
    guard: Arc<AuthorizationGuard<S, A>>,
    roles: Arc<[OrgRole]>,
}

impl<S, A> Clone for RequireOrgRole<S, A> {
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
            roles: Arc::clone(&self.roles),
        }
    }
}

impl<S, A> RequireOrgRole<S, A>
where
    S: MembershipStore,
    A: AuditSink,
{
    /// Require one of the given roles. An empty set requires membership
    /// only.
    #[must_use]
    pub fn new(guard: Arc<AuthorizationGuard<S, A>>, roles: Vec<OrgRole>) -> Self {
        Self {
            guard,
            roles: roles.into(),
        }
    }

    /// Require membership with any role.
    #[must_use]
    pub fn any_member(guard: Arc<AuthorizationGuard<S, A>>) -> Self {
        Self::new(guard, Vec::new())
    }

    pub async fn middleware(&self, mut request: Request, next: Next) -> Result<Response> {
        let claims = request.extensions().get::<SessionClaims>().cloned();
        let ctx = self
            .guard
            .authorize(claims.as_ref(), None, &self.roles)
            .await?;
        request.extensions_mut().insert(ctx);
        Ok(next.run(request).await)
    }
}
