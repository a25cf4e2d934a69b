//! Storage traits for the collaborating persistent store.
//!
//! The core never talks to a database directly; it goes through these
//! traits. Implementations must enforce the uniqueness constraints noted
//! on each method (they are the only concurrency control the core relies
//! on) and must apply membership updates as atomic single-row writes.
//!
//! An in-memory implementation for tests lives in
//! [`memory`](crate::org::memory) behind the `test-stores` feature.

use crate::error::Result;
use crate::org::types::{
    GlobalOrganization, Institute, InstituteOrganization, Membership, MembershipRecord,
    OrgKind, Organization, OrgRole, User, UserType, VerificationStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Fields for creating a user. The store assigns the id.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub external_id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: Option<String>,
    pub user_type: UserType,
}

/// Fields for creating a membership row. The store assigns id and
/// `enrolled_at`, and creates the row active.
#[derive(Clone, Debug)]
pub struct NewMembership {
    pub user_id: i64,
    pub organization_id: i64,
    pub role: OrgRole,
    pub hashed_password: String,
    pub verification_status: VerificationStatus,
    pub verified_by: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// User persistence operations.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: i64) -> Result<Option<User>>;

    /// Lookup by email, case-insensitive.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Create a user. Must fail with `Conflict` when the email, username,
    /// or external id is already taken; that constraint is authoritative
    /// and the service does not pre-check.
    async fn create_user(&self, new_user: NewUser) -> Result<User>;

    /// Replace the user's central password hash.
    async fn set_user_password(&self, user_id: i64, hash: &str) -> Result<()>;
}

/// Organization and institute lookups.
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    async fn find_institute(&self, id: i64) -> Result<Option<Institute>>;

    async fn find_institute_org(&self, id: i64) -> Result<Option<InstituteOrganization>>;

    async fn find_global_org(&self, id: i64) -> Result<Option<GlobalOrganization>>;

    /// Lookup by enrollment key. Keys are unique and non-null within each
    /// organization table.
    async fn find_institute_org_by_key(&self, key: &str)
        -> Result<Option<InstituteOrganization>>;

    async fn find_global_org_by_key(&self, key: &str) -> Result<Option<GlobalOrganization>>;

    /// Replace an organization's enrollment key. Must fail with `Conflict`
    /// if the key is already in use within the organization's table.
    async fn set_enrollment_key(&self, kind: OrgKind, organization_id: i64, key: &str)
        -> Result<()>;

    /// Resolve an organization id against both tables.
    ///
    /// Institute organizations are consulted first; when both tables carry
    /// the same id (ids are not cross-unique), the institute row wins.
    async fn find_organization(&self, id: i64) -> Result<Option<Organization>> {
        if let Some(org) = self.find_institute_org(id).await? {
            return Ok(Some(Organization::Institute(org)));
        }
        Ok(self.find_global_org(id).await?.map(Organization::Global))
    }

    /// Resolve an enrollment key against both tables, institute first.
    async fn find_organization_by_key(&self, key: &str) -> Result<Option<Organization>> {
        if let Some(org) = self.find_institute_org_by_key(key).await? {
            return Ok(Some(Organization::Institute(org)));
        }
        Ok(self
            .find_global_org_by_key(key)
            .await?
            .map(Organization::Global))
    }
}

/// Membership persistence operations, parameterized by table.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Insert a membership row. Must fail with `Conflict` when a row for
    /// `(user_id, organization_id)` already exists in that table; under
    /// two concurrent inserts for the same pair, exactly one succeeds.
    async fn insert_membership(
        &self,
        kind: OrgKind,
        new_membership: NewMembership,
    ) -> Result<MembershipRecord>;

    async fn find_membership_row(
        &self,
        kind: OrgKind,
        user_id: i64,
        organization_id: i64,
    ) -> Result<Option<MembershipRecord>>;

    async fn find_membership_by_id(
        &self,
        kind: OrgKind,
        id: i64,
    ) -> Result<Option<MembershipRecord>>;

    /// Replace a membership row. Must be atomic at the row level and fail
    /// with `NotFound` when the row does not exist.
    async fn update_membership(&self, kind: OrgKind, record: &MembershipRecord) -> Result<()>;

    async fn list_org_memberships(
        &self,
        kind: OrgKind,
        organization_id: i64,
    ) -> Result<Vec<MembershipRecord>>;

    async fn list_user_memberships(
        &self,
        kind: OrgKind,
        user_id: i64,
    ) -> Result<Vec<MembershipRecord>>;

    /// Resolve the membership a user holds in an organization, regardless
    /// of state. The institute table is checked first; if a row exists
    /// there, the global table is not consulted.
    async fn find_membership(
        &self,
        user_id: i64,
        organization_id: i64,
    ) -> Result<Option<Membership>> {
        if let Some(record) = self
            .find_membership_row(OrgKind::Institute, user_id, organization_id)
            .await?
        {
            return Ok(Some(Membership::Institute(record)));
        }
        Ok(self
            .find_membership_row(OrgKind::Global, user_id, organization_id)
            .await?
            .map(Membership::Global))
    }

    /// The canonical lookup used by every authorization decision: returns
    /// a membership only when it is active and approved.
    ///
    /// A non-live institute row does not shadow a live global row; the
    /// precedence applies among live rows only.
    async fn find_active_approved(
        &self,
        user_id: i64,
        organization_id: i64,
    ) -> Result<Option<Membership>> {
        if let Some(record) = self
            .find_membership_row(OrgKind::Institute, user_id, organization_id)
            .await?
        {
            if record.is_live() {
                return Ok(Some(Membership::Institute(record)));
            }
        }
        if let Some(record) = self
            .find_membership_row(OrgKind::Global, user_id, organization_id)
            .await?
        {
            if record.is_live() {
                return Ok(Some(Membership::Global(record)));
            }
        }
        Ok(None)
    }
}
