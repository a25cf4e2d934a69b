//! Authentication and authorization: credential hashing, session tokens,
//! login flows, and the per-request guard.

pub mod guard;
pub mod middleware;
pub mod password;
pub mod service;
pub mod token;

pub use guard::{AccessEvent, AuditSink, AuthorizationGuard, Decision, DenyReason, OrgContext};
pub use middleware::{BearerAuth, RequireOrgRole};
pub use password::{CredentialScheme, PasswordConfig, PasswordHasher};
pub use service::{
    AuthService, CentralSession, NewUserRequest, OrgSession, OrganizationSummary, UserProfile,
};
pub use token::{AuthScope, SessionClaims, SignedToken, TenantContext, TokenIssuer};
