//! In-memory store implementations for tests.
//!
//! [`InMemoryStore`] implements every storage trait over plain hash maps.
//! Cloning shares the same underlying data (uses `Arc` internally), so a
//! ledger, an auth service, and a guard can all observe one dataset.
//! Uniqueness constraints are enforced under a single write lock, which
//! gives the same exactly-one-winner behavior a database constraint would.

use crate::error::{Error, Result};
use crate::org::storage::{
    MembershipStore, NewMembership, NewUser, OrganizationStore, UserStore,
};
use crate::org::types::{
    GlobalOrganization, Institute, InstituteOrganization, MembershipRecord, OrgKind, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct InMemoryStoreInner {
    users: RwLock<HashMap<i64, User>>,
    institutes: RwLock<HashMap<i64, Institute>>,
    institute_orgs: RwLock<HashMap<i64, InstituteOrganization>>,
    global_orgs: RwLock<HashMap<i64, GlobalOrganization>>,
    // (user_id, organization_id) -> row, one map per membership table
    institute_members: RwLock<HashMap<(i64, i64), MembershipRecord>>,
    global_members: RwLock<HashMap<(i64, i64), MembershipRecord>>,
    next_id: AtomicI64,
}

/// In-memory store implementing all storage traits.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<InMemoryStoreInner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InMemoryStoreInner {
                next_id: AtomicI64::new(1),
                ..Default::default()
            }),
        }
    }

    fn next_id(&self) -> i64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert an institute directly (test setup).
    pub fn seed_institute(&self, name: &str, code: &str) -> Institute {
        let id = self.next_id();
        let institute = Institute {
            id,
            external_id: format!("inst_{id}"),
            name: name.to_string(),
            code: code.to_string(),
            is_active: true,
        };
        self.inner
            .institutes
            .write()
            .unwrap()
            .insert(id, institute.clone());
        institute
    }

    /// Insert an institute organization directly (test setup).
    pub fn seed_institute_org(
        &self,
        institute_id: i64,
        name: &str,
        enrollment_key: &str,
        requires_verification: bool,
    ) -> InstituteOrganization {
        let org = InstituteOrganization {
            id: self.next_id(),
            institute_id,
            name: name.to_string(),
            description: None,
            logo: None,
            enrollment_key: enrollment_key.to_string(),
            requires_verification,
            is_active: true,
        };
        self.inner
            .institute_orgs
            .write()
            .unwrap()
            .insert(org.id, org.clone());
        org
    }

    /// Insert a global organization directly (test setup).
    pub fn seed_global_org(
        &self,
        name: &str,
        enrollment_key: &str,
        requires_verification: bool,
    ) -> GlobalOrganization {
        let org = GlobalOrganization {
            id: self.next_id(),
            name: name.to_string(),
            description: None,
            logo: None,
            enrollment_key: enrollment_key.to_string(),
            requires_verification,
            is_active: true,
        };
        self.inner
            .global_orgs
            .write()
            .unwrap()
            .insert(org.id, org.clone());
        org
    }

    /// Flip a user's active flag (test setup).
    pub fn set_user_active_by_email(&self, email: &str, active: bool) {
        let email = email.to_lowercase();
        if let Some(user) = self
            .inner
            .users
            .write()
            .unwrap()
            .values_mut()
            .find(|u| u.email.to_lowercase() == email)
        {
            user.is_active = active;
        }
    }

    /// Flip an organization's active flag (test setup).
    pub fn set_org_active(&self, kind: OrgKind, organization_id: i64, active: bool) {
        match kind {
            OrgKind::Institute => {
                if let Some(org) = self
                    .inner
                    .institute_orgs
                    .write()
                    .unwrap()
                    .get_mut(&organization_id)
                {
                    org.is_active = active;
                }
            }
            OrgKind::Global => {
                if let Some(org) = self
                    .inner
                    .global_orgs
                    .write()
                    .unwrap()
                    .get_mut(&organization_id)
                {
                    org.is_active = active;
                }
            }
        }
    }

    fn members(&self, kind: OrgKind) -> &RwLock<HashMap<(i64, i64), MembershipRecord>> {
        match kind {
            OrgKind::Institute => &self.inner.institute_members,
            OrgKind::Global => &self.inner.global_members,
        }
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.users.read().unwrap().get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .inner
            .users
            .read()
            .unwrap()
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User> {
        let mut users = self.inner.users.write().unwrap();

        let email = new_user.email.to_lowercase();
        for user in users.values() {
            if user.email.to_lowercase() == email {
                return Err(Error::conflict("email already registered"));
            }
            if user.username == new_user.username {
                return Err(Error::conflict("username already taken"));
            }
            if user.external_id == new_user.external_id {
                return Err(Error::conflict("external id already registered"));
            }
        }

        let user = User {
            id: self.next_id(),
            external_id: new_user.external_id,
            email,
            username: new_user.username,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            password: new_user.password,
            user_type: new_user.user_type,
            is_active: true,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_user_password(&self, user_id: i64, hash: &str) -> Result<()> {
        let mut users = self.inner.users.write().unwrap();
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| Error::not_found("user does not exist"))?;
        user.password = Some(hash.to_string());
        Ok(())
    }
}

#[async_trait]
impl OrganizationStore for InMemoryStore {
    async fn find_institute(&self, id: i64) -> Result<Option<Institute>> {
        Ok(self.inner.institutes.read().unwrap().get(&id).cloned())
    }

    async fn find_institute_org(&self, id: i64) -> Result<Option<InstituteOrganization>> {
        Ok(self.inner.institute_orgs.read().unwrap().get(&id).cloned())
    }

    async fn find_global_org(&self, id: i64) -> Result<Option<GlobalOrganization>> {
        Ok(self.inner.global_orgs.read().unwrap().get(&id).cloned())
    }

    async fn find_institute_org_by_key(
        &self,
        key: &str,
    ) -> Result<Option<InstituteOrganization>> {
        Ok(self
            .inner
            .institute_orgs
            .read()
            .unwrap()
            .values()
            .find(|o| o.enrollment_key == key)
            .cloned())
    }

    async fn find_global_org_by_key(&self, key: &str) -> Result<Option<GlobalOrganization>> {
        Ok(self
            .inner
            .global_orgs
            .read()
            .unwrap()
            .values()
            .find(|o| o.enrollment_key == key)
            .cloned())
    }

    async fn set_enrollment_key(
        &self,
        kind: OrgKind,
        organization_id: i64,
        key: &str,
    ) -> Result<()> {
        match kind {
            OrgKind::Institute => {
                let mut orgs = self.inner.institute_orgs.write().unwrap();
                if orgs
                    .values()
                    .any(|o| o.id != organization_id && o.enrollment_key == key)
                {
                    return Err(Error::conflict("enrollment key already in use"));
                }
                let org = orgs
                    .get_mut(&organization_id)
                    .ok_or_else(|| Error::not_found("organization does not exist"))?;
                org.enrollment_key = key.to_string();
            }
            OrgKind::Global => {
                let mut orgs = self.inner.global_orgs.write().unwrap();
                if orgs
                    .values()
                    .any(|o| o.id != organization_id && o.enrollment_key == key)
                {
                    return Err(Error::conflict("enrollment key already in use"));
                }
                let org = orgs
                    .get_mut(&organization_id)
                    .ok_or_else(|| Error::not_found("organization does not exist"))?;
                org.enrollment_key = key.to_string();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for InMemoryStore {
    async fn insert_membership(
        &self,
        kind: OrgKind,
        new_membership: NewMembership,
    ) -> Result<MembershipRecord> {
        // Check-and-insert under one write lock: exactly one of two racing
        // inserts for the same pair can win.
        let mut members = self.members(kind).write().unwrap();
        let key = (new_membership.user_id, new_membership.organization_id);
        if members.contains_key(&key) {
            return Err(Error::conflict("user is already enrolled in this organization"));
        }

        let record = MembershipRecord {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            user_id: new_membership.user_id,
            organization_id: new_membership.organization_id,
            role: new_membership.role,
            hashed_password: new_membership.hashed_password,
            verification_status: new_membership.verification_status,
            is_active: true,
            verified_by: new_membership.verified_by,
            verified_at: new_membership.verified_at,
            enrolled_at: Utc::now(),
        };
        members.insert(key, record.clone());
        Ok(record)
    }

    async fn find_membership_row(
        &self,
        kind: OrgKind,
        user_id: i64,
        organization_id: i64,
    ) -> Result<Option<MembershipRecord>> {
        Ok(self
            .members(kind)
            .read()
            .unwrap()
            .get(&(user_id, organization_id))
            .cloned())
    }

    async fn find_membership_by_id(
        &self,
        kind: OrgKind,
        id: i64,
    ) -> Result<Option<MembershipRecord>> {
        Ok(self
            .members(kind)
            .read()
            .unwrap()
            .values()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn update_membership(&self, kind: OrgKind, record: &MembershipRecord) -> Result<()> {
        let mut members = self.members(kind).write().unwrap();
        let key = (record.user_id, record.organization_id);
        match members.get_mut(&key) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(Error::not_found("membership does not exist")),
        }
    }

    async fn list_org_memberships(
        &self,
        kind: OrgKind,
        organization_id: i64,
    ) -> Result<Vec<MembershipRecord>> {
        let mut rows: Vec<_> = self
            .members(kind)
            .read()
            .unwrap()
            .values()
            .filter(|m| m.organization_id == organization_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.id);
        Ok(rows)
    }

    async fn list_user_memberships(
        &self,
        kind: OrgKind,
        user_id: i64,
    ) -> Result<Vec<MembershipRecord>> {
        let mut rows: Vec<_> = self
            .members(kind)
            .read()
            .unwrap()
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.id);
        Ok(rows)
    }
}
