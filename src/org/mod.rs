//! Organizations and memberships: domain types, storage traits, and the
//! membership ledger.

pub mod ledger;
#[cfg(any(test, feature = "test-stores"))]
pub mod memory;
pub mod storage;
pub mod types;

pub use ledger::MembershipLedger;
pub use storage::{MembershipStore, NewMembership, NewUser, OrganizationStore, UserStore};
pub use types::{
    GlobalOrganization, Institute, InstituteOrganization, Membership, MembershipRecord,
    OrgKind, OrgRole, Organization, ParseRoleError, User, UserType, VerificationStatus,
};

#[cfg(any(test, feature = "test-stores"))]
pub use memory::InMemoryStore;
