//! Per-request authorization decisions.
//!
//! [`AuthorizationGuard::decide`] is the single policy function every
//! protected endpoint runs before its business logic. It re-resolves the
//! caller's membership from the ledger on every request — the role and
//! organization inside the token are treated as hints only, because
//! membership state can change between token issuance and request time.
//!
//! Audit logging is a side-effect hook around the decision, not a
//! separate code path: plug an [`AuditSink`] in with
//! [`AuthorizationGuard::with_audit_sink`].

use crate::error::{Error, Result};
use crate::org::storage::MembershipStore;
use crate::org::types::{Membership, OrgKind, OrgRole};
use crate::auth::token::SessionClaims;
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// The resolved membership attached to an allowed request, for downstream
/// handlers.
#[derive(Clone, Debug)]
pub struct OrgContext {
    pub user_id: i64,
    pub organization_id: i64,
    pub kind: OrgKind,
    /// Current role from the ledger, not the token.
    pub role: OrgRole,
    pub membership: Membership,
}

/// Outcome of an authorization check.
#[derive(Clone, Debug)]
pub enum Decision {
    Allow(OrgContext),
    Deny(DenyReason),
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Why a request was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// No verified claims on the request.
    Unauthenticated,
    /// Neither the request nor the token names a target organization.
    MissingOrganizationId,
    /// No active, approved membership in the target organization.
    NotMember,
    /// Membership exists but its role is outside the endpoint's accepted
    /// set.
    InsufficientRole,
}

impl DenyReason {
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Authentication required",
            Self::MissingOrganizationId => "Organization ID required",
            Self::NotMember => "You are not a member of this organization",
            Self::InsufficientRole => "Insufficient permissions",
        }
    }

    /// Map the denial into the error taxonomy.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self {
            Self::Unauthenticated => Error::unauthorized(self.message()),
            Self::MissingOrganizationId | Self::NotMember | Self::InsufficientRole => {
                Error::forbidden(self.message())
            }
        }
    }
}

/// One observed authorization decision.
#[derive(Clone, Debug)]
pub struct AccessEvent {
    pub user_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub allowed: bool,
    /// Denial message, absent for allowed requests.
    pub reason: Option<&'static str>,
}

/// Observer invoked around every decision. Storage of the trail is the
/// collaborator's concern; the default sink does nothing.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AccessEvent);
}

#[async_trait]
impl AuditSink for () {
    async fn record(&self, _event: AccessEvent) {}
}

/// Membership-backed authorization policy.
pub struct AuthorizationGuard<S, A = ()> {
    store: S,
    audit: A,
}

impl<S> AuthorizationGuard<S>
where
    S: MembershipStore,
{
    pub fn new(store: S) -> Self {
        Self { store, audit: () }
    }

    /// Attach an audit sink observing every decision.
    pub fn with_audit_sink<A: AuditSink>(self, audit: A) -> AuthorizationGuard<S, A> {
        AuthorizationGuard {
            store: self.store,
            audit,
        }
    }
}

impl<S, A> AuthorizationGuard<S, A>
where
    S: MembershipStore,
    A: AuditSink,
{
    /// Decide whether the request may act on the organization.
    ///
    /// `organization_id` is the target from the request path; when `None`,
    /// the token's organization claim is used as the default. The accepted
    /// role set is exact membership — an empty set means "any role, but
    /// must be a member". Errors are reserved for store failures; policy
    /// rejections come back as [`Decision::Deny`].
    #[instrument(skip(self, claims))]
    pub async fn decide(
        &self,
        claims: Option<&SessionClaims>,
        organization_id: Option<i64>,
        acceptable_roles: &[OrgRole],
    ) -> Result<Decision> {
        let decision = self
            .evaluate(claims, organization_id, acceptable_roles)
            .await?;

        let user_id = claims.map(|c| c.sub);
        let target = organization_id.or_else(|| claims.and_then(|c| c.organization_id));
        match &decision {
            Decision::Allow(ctx) => {
                debug!(
                    user_id = ctx.user_id,
                    organization_id = ctx.organization_id,
                    role = %ctx.role,
                    "access granted"
                );
                self.audit
                    .record(AccessEvent {
                        user_id,
                        organization_id: Some(ctx.organization_id),
                        allowed: true,
                        reason: None,
                    })
                    .await;
            }
            Decision::Deny(reason) => {
                warn!(?user_id, ?target, reason = reason.message(), "access denied");
                self.audit
                    .record(AccessEvent {
                        user_id,
                        organization_id: target,
                        allowed: false,
                        reason: Some(reason.message()),
                    })
                    .await;
            }
        }
        Ok(decision)
    }

    /// Like [`decide`](Self::decide), but maps denial straight into the
    /// error taxonomy.
    pub async fn authorize(
        &self,
        claims: Option<&SessionClaims>,
        organization_id: Option<i64>,
        acceptable_roles: &[OrgRole],
    ) -> Result<OrgContext> {
        match self.decide(claims, organization_id, acceptable_roles).await? {
            Decision::Allow(ctx) => Ok(ctx),
            Decision::Deny(reason) => Err(reason.into_error()),
        }
    }

    async fn evaluate(
        &self,
        claims: Option<&SessionClaims>,
        organization_id: Option<i64>,
        acceptable_roles: &[OrgRole],
    ) -> Result<Decision> {
        let Some(claims) = claims else {
            return Ok(Decision::Deny(DenyReason::Unauthenticated));
        };

        let Some(organization_id) = organization_id.or(claims.organization_id) else {
            return Ok(Decision::Deny(DenyReason::MissingOrganizationId));
        };

        let Some(membership) = self
            .store
            .find_active_approved(claims.sub, organization_id)
            .await?
        else {
            return Ok(Decision::Deny(DenyReason::NotMember));
        };

        let role = membership.role();
        if !acceptable_roles.is_empty() && !acceptable_roles.contains(&role) {
            return Ok(Decision::Deny(DenyReason::InsufficientRole));
        }

        Ok(Decision::Allow(OrgContext {
            user_id: claims.sub,
            organization_id,
            kind: membership.kind(),
            role,
            membership,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{PasswordConfig, PasswordHasher};
    use crate::auth::token::AuthScope;
    use crate::org::ledger::MembershipLedger;
    use crate::org::memory::InMemoryStore;
    use std::sync::{Arc, Mutex};

    fn claims(user_id: i64) -> SessionClaims {
        SessionClaims {
            sub: user_id,
            email: "user@example.com".into(),
            institutes: None,
            organization_type: Some(AuthScope::Central),
            organization_id: None,
            role: None,
            iss: "clubdesk-test".into(),
            iat: 0,
            exp: 0,
            jti: "test".into(),
        }
    }

    async fn seeded() -> (InMemoryStore, i64) {
        let store = InMemoryStore::new();
        let ledger = MembershipLedger::new(
            store.clone(),
            PasswordHasher::new(PasswordConfig::fast()),
        );
        let org = store.seed_global_org("Chess", "chess-key", false);
        ledger
            .enroll_by_self(1, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        (store, org.id)
    }

    #[tokio::test]
    async fn test_unauthenticated_denied() {
        let (store, org_id) = seeded().await;
        let guard = AuthorizationGuard::new(store);

        let decision = guard.decide(None, Some(org_id), &[]).await.unwrap();
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_missing_organization_denied() {
        let (store, _) = seeded().await;
        let guard = AuthorizationGuard::new(store);

        let decision = guard.decide(Some(&claims(1)), None, &[]).await.unwrap();
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::MissingOrganizationId)
        ));
    }

    #[tokio::test]
    async fn test_token_organization_used_as_default() {
        let (store, org_id) = seeded().await;
        let guard = AuthorizationGuard::new(store);

        let mut token_claims = claims(1);
        token_claims.organization_type = Some(AuthScope::Global);
        token_claims.organization_id = Some(org_id);
        token_claims.role = Some(OrgRole::Member);

        let decision = guard.decide(Some(&token_claims), None, &[]).await.unwrap();
        match decision {
            Decision::Allow(ctx) => assert_eq!(ctx.organization_id, org_id),
            other => panic!("expected allow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_member_denied() {
        let (store, org_id) = seeded().await;
        let guard = AuthorizationGuard::new(store);

        let decision = guard
            .decide(Some(&claims(999)), Some(org_id), &[])
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Deny(DenyReason::NotMember)));
    }

    #[tokio::test]
    async fn test_pending_membership_is_not_membership() {
        let store = InMemoryStore::new();
        let ledger = MembershipLedger::new(
            store.clone(),
            PasswordHasher::new(PasswordConfig::fast()),
        );
        let org = store.seed_global_org("Debate", "debate-key", true);
        ledger
            .enroll_by_self(1, "debate-key", "pass", OrgRole::Member)
            .await
            .unwrap();

        let guard = AuthorizationGuard::new(store);
        let decision = guard
            .decide(Some(&claims(1)), Some(org.id), &[])
            .await
            .unwrap();
        assert!(matches!(decision, Decision::Deny(DenyReason::NotMember)));
    }

    #[tokio::test]
    async fn test_role_set_is_exact() {
        let (store, org_id) = seeded().await;
        let guard = AuthorizationGuard::new(store);

        // Empty set: membership alone suffices.
        let decision = guard
            .decide(Some(&claims(1)), Some(org_id), &[])
            .await
            .unwrap();
        assert!(decision.is_allowed());

        let decision = guard
            .decide(
                Some(&claims(1)),
                Some(org_id),
                &[OrgRole::Member, OrgRole::Moderator],
            )
            .await
            .unwrap();
        assert!(decision.is_allowed());

        let decision = guard
            .decide(Some(&claims(1)), Some(org_id), &[OrgRole::President])
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::InsufficientRole)
        ));
    }

    #[tokio::test]
    async fn test_token_role_claim_is_advisory_only() {
        let (store, org_id) = seeded().await;
        let guard = AuthorizationGuard::new(store);

        // Forged or stale token claiming PRESIDENT; the ledger says
        // MEMBER, and the ledger wins.
        let mut forged = claims(1);
        forged.organization_type = Some(AuthScope::Global);
        forged.organization_id = Some(org_id);
        forged.role = Some(OrgRole::President);

        let decision = guard
            .decide(Some(&forged), Some(org_id), &[OrgRole::President])
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Deny(DenyReason::InsufficientRole)
        ));

        match guard.decide(Some(&forged), Some(org_id), &[]).await.unwrap() {
            Decision::Allow(ctx) => assert_eq!(ctx.role, OrgRole::Member),
            other => panic!("expected allow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_authorize_maps_denials_to_errors() {
        let (store, org_id) = seeded().await;
        let guard = AuthorizationGuard::new(store);

        let err = guard.authorize(None, Some(org_id), &[]).await.unwrap_err();
        assert_eq!(err.kind(), "unauthorized");

        let err = guard
            .authorize(Some(&claims(1)), Some(org_id), &[OrgRole::President])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let ctx = guard
            .authorize(Some(&claims(1)), Some(org_id), &[])
            .await
            .unwrap();
        assert_eq!(ctx.kind, OrgKind::Global);
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        events: Arc<Mutex<Vec<AccessEvent>>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: AccessEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn test_audit_sink_observes_every_decision() {
        let (store, org_id) = seeded().await;
        let sink = RecordingSink::default();
        let guard = AuthorizationGuard::new(store).with_audit_sink(sink.clone());

        guard
            .decide(Some(&claims(1)), Some(org_id), &[])
            .await
            .unwrap();
        guard.decide(None, Some(org_id), &[]).await.unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].allowed);
        assert!(!events[1].allowed);
        assert_eq!(events[1].reason, Some("Authentication required"));
    }
}
