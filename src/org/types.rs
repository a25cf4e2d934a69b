//! Domain records and enums for users, organizations, and memberships.
//!
//! Memberships come in two tenant flavors, institute-scoped and global,
//! stored in separate tables with the same shape. [`Membership`] models
//! that as an explicit tagged union; resolvers that consult both tables
//! always check the institute side first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which membership table an organization (and its memberships) lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgKind {
    /// Scoped to a single institute.
    Institute,
    /// Not tied to any institute.
    Global,
}

impl OrgKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Institute => "institute",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for OrgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role held within one organization.
///
/// Role checks are exact set membership; no role implies another.
/// `Admin` is only meaningful for global organizations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgRole {
    President,
    VicePresident,
    Secretary,
    Treasurer,
    Moderator,
    #[default]
    Member,
    Admin,
}

impl OrgRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::President => "PRESIDENT",
            Self::VicePresident => "VICE_PRESIDENT",
            Self::Secretary => "SECRETARY",
            Self::Treasurer => "TREASURER",
            Self::Moderator => "MODERATOR",
            Self::Member => "MEMBER",
            Self::Admin => "ADMIN",
        }
    }

    /// Whether this role can assign members, change roles, verify
    /// enrollments, and deactivate memberships.
    #[must_use]
    pub fn can_manage_members(&self) -> bool {
        matches!(self, Self::President | Self::VicePresident)
    }

    /// Whether this role can rotate the organization's enrollment key.
    #[must_use]
    pub fn can_rotate_enrollment_key(&self) -> bool {
        matches!(self, Self::President | Self::VicePresident | Self::Secretary)
    }
}

/// Error returned when parsing a role string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError {
    invalid_value: String,
}

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid role: '{}'", self.invalid_value)
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for OrgRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRESIDENT" => Ok(Self::President),
            "VICE_PRESIDENT" => Ok(Self::VicePresident),
            "SECRETARY" => Ok(Self::Secretary),
            "TREASURER" => Ok(Self::Treasurer),
            "MODERATOR" => Ok(Self::Moderator),
            "MEMBER" => Ok(Self::Member),
            "ADMIN" => Ok(Self::Admin),
            _ => Err(ParseRoleError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gatekeeping state for memberships that require human approval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

/// Coarse account classification carried on the user record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    #[default]
    Student,
    Instructor,
    Admin,
    Staff,
    Guest,
}

/// Global identity record.
#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    /// Correlation key for the external LMS; defaults to the email at
    /// registration when the upstream system supplies none.
    pub external_id: String,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    /// Central password hash. Accounts created by sync have none and
    /// cannot complete central login until one is set.
    pub password: Option<String>,
    pub user_type: UserType,
    pub is_active: bool,
}

/// Tenant-owning entity, e.g. a university. Read-mostly.
#[derive(Clone, Debug)]
pub struct Institute {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub code: String,
    pub is_active: bool,
}

/// An organization scoped to one institute.
#[derive(Clone, Debug)]
pub struct InstituteOrganization {
    pub id: i64,
    pub institute_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub logo: Option<String>,
    /// Shared-secret join token; unique among institute organizations.
    pub enrollment_key: String,
    pub requires_verification: bool,
    pub is_active: bool,
}

/// An organization not tied to any institute.
#[derive(Clone, Debug)]
pub struct GlobalOrganization {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub logo: Option<String>,
    /// Shared-secret join token; unique among global organizations.
    pub enrollment_key: String,
    pub requires_verification: bool,
    pub is_active: bool,
}

/// Tagged union over the two organization tables.
#[derive(Clone, Debug)]
pub enum Organization {
    Institute(InstituteOrganization),
    Global(GlobalOrganization),
}

impl Organization {
    #[must_use]
    pub fn kind(&self) -> OrgKind {
        match self {
            Self::Institute(_) => OrgKind::Institute,
            Self::Global(_) => OrgKind::Global,
        }
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        match self {
            Self::Institute(o) => o.id,
            Self::Global(o) => o.id,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Institute(o) => &o.name,
            Self::Global(o) => &o.name,
        }
    }

    #[must_use]
    pub fn enrollment_key(&self) -> &str {
        match self {
            Self::Institute(o) => &o.enrollment_key,
            Self::Global(o) => &o.enrollment_key,
        }
    }

    #[must_use]
    pub fn requires_verification(&self) -> bool {
        match self {
            Self::Institute(o) => o.requires_verification,
            Self::Global(o) => o.requires_verification,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::Institute(o) => o.is_active,
            Self::Global(o) => o.is_active,
        }
    }

    /// Owning institute id, for institute organizations.
    #[must_use]
    pub fn institute_id(&self) -> Option<i64> {
        match self {
            Self::Institute(o) => Some(o.institute_id),
            Self::Global(_) => None,
        }
    }
}

/// Row shape shared by both membership tables.
///
/// Natural key: `(user_id, organization_id)` within one table.
#[derive(Clone, Debug)]
pub struct MembershipRecord {
    pub id: i64,
    pub user_id: i64,
    pub organization_id: i64,
    pub role: OrgRole,
    /// Organization-scoped credential, hashed independently of the user's
    /// central password.
    pub hashed_password: String,
    pub verification_status: VerificationStatus,
    pub is_active: bool,
    pub verified_by: Option<i64>,
    pub verified_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
}

impl MembershipRecord {
    /// Whether this row grants membership for authorization purposes.
    /// Anything other than active + approved counts as "not a member".
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.is_active && self.verification_status == VerificationStatus::Approved
    }
}

/// A membership row tagged with the table it came from.
#[derive(Clone, Debug)]
pub enum Membership {
    Institute(MembershipRecord),
    Global(MembershipRecord),
}

impl Membership {
    #[must_use]
    pub fn kind(&self) -> OrgKind {
        match self {
            Self::Institute(_) => OrgKind::Institute,
            Self::Global(_) => OrgKind::Global,
        }
    }

    #[must_use]
    pub fn record(&self) -> &MembershipRecord {
        match self {
            Self::Institute(r) | Self::Global(r) => r,
        }
    }

    #[must_use]
    pub fn into_record(self) -> MembershipRecord {
        match self {
            Self::Institute(r) | Self::Global(r) => r,
        }
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.record().id
    }

    #[must_use]
    pub fn user_id(&self) -> i64 {
        self.record().user_id
    }

    #[must_use]
    pub fn organization_id(&self) -> i64 {
        self.record().organization_id
    }

    #[must_use]
    pub fn role(&self) -> OrgRole {
        self.record().role
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.record().is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            OrgRole::President,
            OrgRole::VicePresident,
            OrgRole::Secretary,
            OrgRole::Treasurer,
            OrgRole::Moderator,
            OrgRole::Member,
            OrgRole::Admin,
        ] {
            assert_eq!(role.as_str().parse::<OrgRole>().unwrap(), role);
        }
    }

    #[test]
    fn test_role_parsing_is_case_sensitive() {
        assert!("president".parse::<OrgRole>().is_err());
        assert!("Vice_President".parse::<OrgRole>().is_err());
        assert_eq!(
            "VICE_PRESIDENT".parse::<OrgRole>().unwrap(),
            OrgRole::VicePresident
        );
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&OrgRole::VicePresident).unwrap();
        assert_eq!(json, "\"VICE_PRESIDENT\"");
        let parsed: OrgRole = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, OrgRole::VicePresident);
    }

    #[test]
    fn test_management_role_sets() {
        assert!(OrgRole::President.can_manage_members());
        assert!(OrgRole::VicePresident.can_manage_members());
        assert!(!OrgRole::Secretary.can_manage_members());
        assert!(!OrgRole::Member.can_manage_members());
        assert!(!OrgRole::Admin.can_manage_members());

        assert!(OrgRole::Secretary.can_rotate_enrollment_key());
        assert!(!OrgRole::Treasurer.can_rotate_enrollment_key());
        assert!(!OrgRole::Moderator.can_rotate_enrollment_key());
    }

    #[test]
    fn test_verification_status_serialization() {
        assert_eq!(
            serde_json::to_string(&VerificationStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&VerificationStatus::Approved).unwrap(),
            "\"APPROVED\""
        );
    }

    #[test]
    fn test_membership_liveness() {
        let mut record = MembershipRecord {
            id: 1,
            user_id: 10,
            organization_id: 20,
            role: OrgRole::Member,
            hashed_password: "hash".into(),
            verification_status: VerificationStatus::Pending,
            is_active: true,
            verified_by: None,
            verified_at: None,
            enrolled_at: Utc::now(),
        };
        assert!(!record.is_live());

        record.verification_status = VerificationStatus::Approved;
        assert!(record.is_live());

        record.is_active = false;
        assert!(!record.is_live());

        record.is_active = true;
        record.verification_status = VerificationStatus::Rejected;
        assert!(!record.is_live());
    }

    #[test]
    fn test_membership_tagging() {
        let record = MembershipRecord {
            id: 7,
            user_id: 1,
            organization_id: 2,
            role: OrgRole::President,
            hashed_password: "hash".into(),
            verification_status: VerificationStatus::Approved,
            is_active: true,
            verified_by: None,
            verified_at: None,
            enrolled_at: Utc::now(),
        };
        let membership = Membership::Institute(record);
        assert_eq!(membership.kind(), OrgKind::Institute);
        assert_eq!(membership.role(), OrgRole::President);
        assert_eq!(membership.organization_id(), 2);
    }
}
