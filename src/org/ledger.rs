//! The membership ledger: the authoritative record of who belongs to
//! which organization, with what role and verification state.
//!
//! Ledger operations are plain state transitions over the backing store.
//! Operations that the product exposes to organization officers carry
//! their own permission checks (assign, role change, deactivation, key
//! rotation); `verify` deliberately does not — which callers may verify a
//! membership is endpoint policy and belongs to the authorization guard.
//!
//! # Example
//!
//! ```rust,ignore
//! use clubdesk::org::MembershipLedger;
//!
//! let ledger = MembershipLedger::new(store, hasher);
//! let membership = ledger
//!     .enroll_by_self(user_id, "enrollment-key", "org-password", OrgRole::Member)
//!     .await?;
//! ```

use crate::auth::password::PasswordHasher;
use crate::error::{Error, Result};
use crate::org::storage::{MembershipStore, NewMembership, OrganizationStore};
use crate::org::types::{
    Membership, MembershipRecord, OrgKind, OrgRole, VerificationStatus,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use tracing::{info, instrument};

fn tag(kind: OrgKind, record: MembershipRecord) -> Membership {
    match kind {
        OrgKind::Institute => Membership::Institute(record),
        OrgKind::Global => Membership::Global(record),
    }
}

/// Membership state transitions over a backing store.
pub struct MembershipLedger<S> {
    store: S,
    hasher: PasswordHasher,
}

impl<S> MembershipLedger<S>
where
    S: OrganizationStore + MembershipStore,
{
    pub fn new(store: S, hasher: PasswordHasher) -> Self {
        Self { store, hasher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Self-enrollment with an organization's shared enrollment key.
    ///
    /// The initial verification status follows the organization's
    /// `requires_verification` flag. A row already live for this user
    /// (active, pending or approved) is a `Conflict`; a rejected or
    /// deactivated row is revived in place with a fresh password and a
    /// freshly computed status, so one rejection is not a permanent ban.
    #[instrument(skip(self, enrollment_key, password))]
    pub async fn enroll_by_self(
        &self,
        user_id: i64,
        enrollment_key: &str,
        password: &str,
        requested_role: OrgRole,
    ) -> Result<Membership> {
        let organization = self
            .store
            .find_organization_by_key(enrollment_key)
            .await?
            .filter(|o| o.is_active())
            .ok_or_else(|| Error::not_found("no active organization matches this enrollment key"))?;

        let kind = organization.kind();
        let organization_id = organization.id();
        let verification_status = if organization.requires_verification() {
            VerificationStatus::Pending
        } else {
            VerificationStatus::Approved
        };
        let hashed_password = self.hasher.hash(password)?;

        if let Some(existing) = self
            .store
            .find_membership_row(kind, user_id, organization_id)
            .await?
        {
            if existing.is_active
                && existing.verification_status != VerificationStatus::Rejected
            {
                return Err(Error::conflict(
                    "user is already enrolled in this organization",
                ));
            }

            let revived = MembershipRecord {
                role: requested_role,
                hashed_password,
                verification_status,
                is_active: true,
                verified_by: None,
                verified_at: None,
                enrolled_at: Utc::now(),
                ..existing
            };
            self.store.update_membership(kind, &revived).await?;
            info!(
                user_id,
                organization_id,
                kind = %kind,
                status = verification_status.as_str(),
                "membership re-enrolled"
            );
            return Ok(tag(kind, revived));
        }

        let record = self
            .store
            .insert_membership(
                kind,
                NewMembership {
                    user_id,
                    organization_id,
                    role: requested_role,
                    hashed_password,
                    verification_status,
                    verified_by: None,
                    verified_at: None,
                },
            )
            .await?;

        info!(
            user_id,
            organization_id,
            kind = %kind,
            status = verification_status.as_str(),
            "member enrolled"
        );
        Ok(tag(kind, record))
    }

    /// Direct assignment by an organization officer.
    ///
    /// The acting user must hold a live PRESIDENT or VICE_PRESIDENT
    /// membership in the organization. The created membership is approved
    /// immediately, with the acting user recorded as verifier.
    #[instrument(skip(self, password))]
    pub async fn assign_directly(
        &self,
        acting_user_id: i64,
        target_user_id: i64,
        organization_id: i64,
        role: OrgRole,
        password: &str,
    ) -> Result<Membership> {
        let organization = self
            .store
            .find_organization(organization_id)
            .await?
            .filter(|o| o.is_active())
            .ok_or_else(|| Error::not_found("organization does not exist or is inactive"))?;

        let kind = organization.kind();
        self.require_manager(kind, organization_id, acting_user_id)
            .await?;

        let hashed_password = self.hasher.hash(password)?;
        let record = self
            .store
            .insert_membership(
                kind,
                NewMembership {
                    user_id: target_user_id,
                    organization_id,
                    role,
                    hashed_password,
                    verification_status: VerificationStatus::Approved,
                    verified_by: Some(acting_user_id),
                    verified_at: Some(Utc::now()),
                },
            )
            .await?;

        info!(
            acting_user_id,
            target_user_id,
            organization_id,
            kind = %kind,
            role = %role,
            "member assigned directly"
        );
        Ok(tag(kind, record))
    }

    /// Resolve a pending membership to approved or rejected.
    ///
    /// Records the verifier and timestamp. This is a bare state
    /// transition: whether `verifier_id` is allowed to verify is checked
    /// by the authorization guard at the call site.
    #[instrument(skip(self))]
    pub async fn verify(
        &self,
        kind: OrgKind,
        membership_id: i64,
        verifier_id: i64,
        approved: bool,
    ) -> Result<Membership> {
        let mut record = self
            .store
            .find_membership_by_id(kind, membership_id)
            .await?
            .ok_or_else(|| Error::not_found("membership does not exist"))?;

        record.verification_status = if approved {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Rejected
        };
        record.verified_by = Some(verifier_id);
        record.verified_at = Some(Utc::now());

        self.store.update_membership(kind, &record).await?;
        info!(
            membership_id,
            verifier_id,
            kind = %kind,
            status = record.verification_status.as_str(),
            "membership verified"
        );
        Ok(tag(kind, record))
    }

    /// Change a member's role. Requires the acting user to hold a live
    /// PRESIDENT or VICE_PRESIDENT membership in the organization.
    #[instrument(skip(self))]
    pub async fn update_role(
        &self,
        organization_id: i64,
        target_user_id: i64,
        new_role: OrgRole,
        acting_user_id: i64,
    ) -> Result<Membership> {
        let membership = self
            .store
            .find_membership(target_user_id, organization_id)
            .await?
            .ok_or_else(|| Error::not_found("user has no membership in this organization"))?;

        let kind = membership.kind();
        self.require_manager(kind, organization_id, acting_user_id)
            .await?;

        let mut record = membership.into_record();
        record.role = new_role;
        self.store.update_membership(kind, &record).await?;

        info!(
            acting_user_id,
            target_user_id,
            organization_id,
            role = %new_role,
            "member role updated"
        );
        Ok(tag(kind, record))
    }

    /// Soft-delete a membership. Same permission check as `update_role`.
    /// Deactivating an already-inactive membership is a no-op success.
    #[instrument(skip(self))]
    pub async fn deactivate(
        &self,
        organization_id: i64,
        target_user_id: i64,
        acting_user_id: i64,
    ) -> Result<()> {
        let membership = self
            .store
            .find_membership(target_user_id, organization_id)
            .await?
            .ok_or_else(|| Error::not_found("user has no membership in this organization"))?;

        let kind = membership.kind();
        self.require_manager(kind, organization_id, acting_user_id)
            .await?;

        let mut record = membership.into_record();
        if !record.is_active {
            return Ok(());
        }
        record.is_active = false;
        self.store.update_membership(kind, &record).await?;

        info!(
            acting_user_id,
            target_user_id,
            organization_id,
            "member deactivated"
        );
        Ok(())
    }

    /// The canonical lookup used by every authorization decision.
    pub async fn find_active_approved(
        &self,
        user_id: i64,
        organization_id: i64,
    ) -> Result<Option<Membership>> {
        self.store
            .find_active_approved(user_id, organization_id)
            .await
    }

    /// Administrative override of an organization-scoped password.
    /// Re-hashes and stores; verification state is untouched.
    #[instrument(skip(self, new_password))]
    pub async fn set_organization_password(
        &self,
        user_id: i64,
        organization_id: i64,
        new_password: &str,
    ) -> Result<()> {
        let membership = self
            .store
            .find_membership(user_id, organization_id)
            .await?
            .ok_or_else(|| Error::not_found("user has no membership in this organization"))?;

        let kind = membership.kind();
        let mut record = membership.into_record();
        record.hashed_password = self.hasher.hash(new_password)?;
        self.store.update_membership(kind, &record).await?;

        info!(user_id, organization_id, "organization password reset");
        Ok(())
    }

    /// Active members of an organization.
    pub async fn members(&self, organization_id: i64) -> Result<Vec<Membership>> {
        let organization = self
            .store
            .find_organization(organization_id)
            .await?
            .ok_or_else(|| Error::not_found("organization does not exist"))?;
        let kind = organization.kind();

        let rows = self
            .store
            .list_org_memberships(kind, organization_id)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.is_active)
            .map(|r| tag(kind, r))
            .collect())
    }

    /// Verifier work queue: active memberships still awaiting a decision.
    pub async fn pending_verifications(&self, organization_id: i64) -> Result<Vec<Membership>> {
        let organization = self
            .store
            .find_organization(organization_id)
            .await?
            .ok_or_else(|| Error::not_found("organization does not exist"))?;
        let kind = organization.kind();

        let rows = self
            .store
            .list_org_memberships(kind, organization_id)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.is_active && r.verification_status == VerificationStatus::Pending)
            .map(|r| tag(kind, r))
            .collect())
    }

    /// Replace the organization's enrollment key with a fresh random one.
    /// Requires PRESIDENT, VICE_PRESIDENT, or SECRETARY.
    #[instrument(skip(self))]
    pub async fn rotate_enrollment_key(
        &self,
        organization_id: i64,
        acting_user_id: i64,
    ) -> Result<String> {
        let organization = self
            .store
            .find_organization(organization_id)
            .await?
            .filter(|o| o.is_active())
            .ok_or_else(|| Error::not_found("organization does not exist or is inactive"))?;
        let kind = organization.kind();

        let acting = self
            .store
            .find_membership_row(kind, acting_user_id, organization_id)
            .await?
            .filter(MembershipRecord::is_live)
            .ok_or_else(|| {
                Error::forbidden("only organization officers can rotate the enrollment key")
            })?;
        if !acting.role.can_rotate_enrollment_key() {
            return Err(Error::forbidden(
                "only organization officers can rotate the enrollment key",
            ));
        }

        let key = generate_enrollment_key();
        self.store
            .set_enrollment_key(kind, organization_id, &key)
            .await?;

        info!(acting_user_id, organization_id, "enrollment key rotated");
        Ok(key)
    }

    /// Require a live managing membership (PRESIDENT or VICE_PRESIDENT)
    /// in the given organization.
    async fn require_manager(
        &self,
        kind: OrgKind,
        organization_id: i64,
        acting_user_id: i64,
    ) -> Result<MembershipRecord> {
        let membership = self
            .store
            .find_membership_row(kind, acting_user_id, organization_id)
            .await?
            .filter(MembershipRecord::is_live)
            .ok_or_else(|| {
                Error::forbidden("only presidents or vice presidents can manage members")
            })?;

        if !membership.role.can_manage_members() {
            return Err(Error::forbidden(
                "only presidents or vice presidents can manage members",
            ));
        }
        Ok(membership)
    }
}

fn generate_enrollment_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 18];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordConfig;
    use crate::org::memory::InMemoryStore;

    fn ledger() -> (InMemoryStore, MembershipLedger<InMemoryStore>) {
        let store = InMemoryStore::new();
        let hasher = PasswordHasher::new(PasswordConfig::fast());
        (store.clone(), MembershipLedger::new(store, hasher))
    }

    #[tokio::test]
    async fn test_enroll_without_verification_is_approved() {
        let (store, ledger) = ledger();
        let institute = store.seed_institute("State University", "SU");
        let org = store.seed_institute_org(institute.id, "Chess Club", "chess-key", false);

        let membership = ledger
            .enroll_by_self(1, "chess-key", "org-pass", OrgRole::Member)
            .await
            .unwrap();

        assert_eq!(membership.kind(), OrgKind::Institute);
        assert_eq!(membership.organization_id(), org.id);
        assert_eq!(
            membership.record().verification_status,
            VerificationStatus::Approved
        );
        assert!(membership.is_live());
    }

    #[tokio::test]
    async fn test_enroll_with_verification_is_pending() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Debate Society", "debate-key", true);

        let membership = ledger
            .enroll_by_self(1, "debate-key", "org-pass", OrgRole::Member)
            .await
            .unwrap();

        assert_eq!(membership.kind(), OrgKind::Global);
        assert_eq!(
            membership.record().verification_status,
            VerificationStatus::Pending
        );
        assert!(!membership.is_live());
        assert!(ledger
            .find_active_approved(1, org.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_enroll_unknown_key_not_found() {
        let (_, ledger) = ledger();
        let err = ledger
            .enroll_by_self(1, "no-such-key", "pass", OrgRole::Member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_enroll_inactive_org_not_found() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Dormant", "dormant-key", false);
        store.set_org_active(OrgKind::Global, org.id, false);

        let err = ledger
            .enroll_by_self(1, "dormant-key", "pass", OrgRole::Member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_duplicate_enroll_conflicts() {
        let (store, ledger) = ledger();
        store.seed_global_org("Chess", "chess-key", false);

        ledger
            .enroll_by_self(1, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        let err = ledger
            .enroll_by_self(1, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_pending_enroll_blocks_re_enroll() {
        let (store, ledger) = ledger();
        store.seed_global_org("Debate", "debate-key", true);

        ledger
            .enroll_by_self(1, "debate-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        let err = ledger
            .enroll_by_self(1, "debate-key", "pass", OrgRole::Member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn test_rejected_member_can_re_enroll() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Debate", "debate-key", true);

        let membership = ledger
            .enroll_by_self(1, "debate-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        ledger
            .verify(OrgKind::Global, membership.id(), 99, false)
            .await
            .unwrap();

        // Rejection is not a permanent ban: the row is revived as a fresh
        // application.
        let revived = ledger
            .enroll_by_self(1, "debate-key", "new-pass", OrgRole::Member)
            .await
            .unwrap();
        assert_eq!(revived.id(), membership.id());
        assert_eq!(
            revived.record().verification_status,
            VerificationStatus::Pending
        );
        assert!(revived.record().verified_by.is_none());
        assert!(revived.record().verified_at.is_none());
        assert_eq!(revived.organization_id(), org.id);
    }

    #[tokio::test]
    async fn test_deactivated_member_can_re_enroll() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Chess", "chess-key", false);

        ledger
            .enroll_by_self(10, "chess-key", "pass", OrgRole::President)
            .await
            .unwrap();
        ledger
            .enroll_by_self(1, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        ledger.deactivate(org.id, 1, 10).await.unwrap();
        assert!(ledger.find_active_approved(1, org.id).await.unwrap().is_none());

        let revived = ledger
            .enroll_by_self(1, "chess-key", "pass-2", OrgRole::Member)
            .await
            .unwrap();
        assert!(revived.is_live());
    }

    #[tokio::test]
    async fn test_verify_approves_and_rejects() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Debate", "debate-key", true);

        let membership = ledger
            .enroll_by_self(1, "debate-key", "pass", OrgRole::Member)
            .await
            .unwrap();

        let approved = ledger
            .verify(OrgKind::Global, membership.id(), 42, true)
            .await
            .unwrap();
        assert_eq!(
            approved.record().verification_status,
            VerificationStatus::Approved
        );
        assert_eq!(approved.record().verified_by, Some(42));
        assert!(approved.record().verified_at.is_some());

        // Approval takes effect immediately for the canonical lookup.
        assert!(ledger
            .find_active_approved(1, org.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_verify_unknown_membership_not_found() {
        let (_, ledger) = ledger();
        let err = ledger
            .verify(OrgKind::Global, 999, 1, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_assign_directly_requires_manager_role() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Chess", "chess-key", false);

        ledger
            .enroll_by_self(10, "chess-key", "pass", OrgRole::President)
            .await
            .unwrap();
        ledger
            .enroll_by_self(11, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap();

        // A plain member cannot assign.
        let err = ledger
            .assign_directly(11, 20, org.id, OrgRole::Member, "pass")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        // A non-member cannot assign.
        let err = ledger
            .assign_directly(99, 20, org.id, OrgRole::Member, "pass")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        // A president can, and the row is pre-approved with verifier set.
        let assigned = ledger
            .assign_directly(10, 20, org.id, OrgRole::Treasurer, "pass")
            .await
            .unwrap();
        assert!(assigned.is_live());
        assert_eq!(assigned.record().verified_by, Some(10));
        assert_eq!(assigned.role(), OrgRole::Treasurer);
    }

    #[tokio::test]
    async fn test_assign_directly_unknown_org_not_found() {
        let (_, ledger) = ledger();
        let err = ledger
            .assign_directly(1, 2, 999, OrgRole::Member, "pass")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_update_role() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Chess", "chess-key", false);

        ledger
            .enroll_by_self(10, "chess-key", "pass", OrgRole::President)
            .await
            .unwrap();
        ledger
            .enroll_by_self(1, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap();

        let err = ledger
            .update_role(org.id, 10, OrgRole::Member, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let err = ledger
            .update_role(org.id, 999, OrgRole::Member, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let updated = ledger
            .update_role(org.id, 1, OrgRole::Secretary, 10)
            .await
            .unwrap();
        assert_eq!(updated.role(), OrgRole::Secretary);
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Chess", "chess-key", false);

        ledger
            .enroll_by_self(10, "chess-key", "pass", OrgRole::President)
            .await
            .unwrap();
        ledger
            .enroll_by_self(1, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap();

        ledger.deactivate(org.id, 1, 10).await.unwrap();
        // Second deactivation is a no-op success.
        ledger.deactivate(org.id, 1, 10).await.unwrap();
        assert!(ledger.find_active_approved(1, org.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_organization_password_keeps_state() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Debate", "debate-key", true);

        let membership = ledger
            .enroll_by_self(1, "debate-key", "old-pass", OrgRole::Member)
            .await
            .unwrap();
        let old_hash = membership.record().hashed_password.clone();

        ledger
            .set_organization_password(1, org.id, "new-pass")
            .await
            .unwrap();

        let row = ledger
            .store()
            .find_membership_row(OrgKind::Global, 1, org.id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(row.hashed_password, old_hash);
        assert_eq!(row.verification_status, VerificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_verifications_queue() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Debate", "debate-key", true);

        let first = ledger
            .enroll_by_self(1, "debate-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        ledger
            .enroll_by_self(2, "debate-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        ledger
            .verify(OrgKind::Global, first.id(), 99, true)
            .await
            .unwrap();

        let pending = ledger.pending_verifications(org.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id(), 2);

        let members = ledger.members(org.id).await.unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn test_rotate_enrollment_key_permissions() {
        let (store, ledger) = ledger();
        let org = store.seed_global_org("Chess", "chess-key", false);

        ledger
            .enroll_by_self(10, "chess-key", "pass", OrgRole::Secretary)
            .await
            .unwrap();
        ledger
            .enroll_by_self(11, "chess-key", "pass", OrgRole::Treasurer)
            .await
            .unwrap();

        let err = ledger.rotate_enrollment_key(org.id, 11).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        let new_key = ledger.rotate_enrollment_key(org.id, 10).await.unwrap();
        assert_ne!(new_key, "chess-key");

        // The old key stops resolving; the new one enrolls.
        let err = ledger
            .enroll_by_self(1, "chess-key", "pass", OrgRole::Member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        ledger
            .enroll_by_self(1, &new_key, "pass", OrgRole::Member)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_institute_key_checked_before_global() {
        let (store, ledger) = ledger();
        let institute = store.seed_institute("State University", "SU");
        store.seed_institute_org(institute.id, "Chess", "shared-key", false);
        store.seed_global_org("Other Chess", "shared-key", false);

        let membership = ledger
            .enroll_by_self(1, "shared-key", "pass", OrgRole::Member)
            .await
            .unwrap();
        assert_eq!(membership.kind(), OrgKind::Institute);
    }
}
