//! Authentication flows: central login, per-organization login,
//! registration, and password changes.
//!
//! Central login authenticates against the user's own credential and
//! yields a token with no active tenant; organization login authenticates
//! against the membership's organization-scoped credential and yields a
//! token carrying the tenant context. Every rejection on a login path uses
//! one generic message per path, so callers cannot probe which factor
//! failed.

use crate::auth::password::{CredentialScheme, PasswordHasher};
use crate::auth::token::TokenIssuer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::org::storage::{MembershipStore, NewUser, OrganizationStore, UserStore};
use crate::org::types::{Membership, OrgKind, OrgRole, User, UserType};
use serde::Serialize;
use tracing::{debug, info, instrument};

const ORG_LOGIN_FAILED: &str = "Invalid organization credentials";

/// Owning institute of an institute organization, for session responses.
#[derive(Clone, Debug, Serialize)]
pub struct InstituteSummary {
    pub id: i64,
    pub name: String,
}

/// One organization a user belongs to, with their role in it.
#[derive(Clone, Debug, Serialize)]
pub struct OrganizationSummary {
    pub id: i64,
    pub name: String,
    pub role: OrgRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institute: Option<InstituteSummary>,
}

/// Approved memberships grouped by organization type.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UserOrganizations {
    pub institute: Vec<OrganizationSummary>,
    pub global: Vec<OrganizationSummary>,
}

/// User summary returned by central login.
#[derive(Clone, Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: UserType,
    pub organizations: UserOrganizations,
}

/// Successful central login.
#[derive(Clone, Debug, Serialize)]
pub struct CentralSession {
    pub access_token: String,
    pub expires_in: u64,
    pub user: UserProfile,
}

/// Successful organization login.
#[derive(Clone, Debug, Serialize)]
pub struct OrgSession {
    pub access_token: String,
    pub expires_in: u64,
    pub user: OrgSessionUser,
}

/// User summary for an organization session, scoped to the one
/// organization that was logged into.
#[derive(Clone, Debug, Serialize)]
pub struct OrgSessionUser {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: OrgRole,
    pub organization: OrganizationSummary,
}

/// Registration input.
#[derive(Clone, Debug)]
pub struct NewUserRequest {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    /// Defaults to the lowest-privilege tier.
    pub user_type: Option<UserType>,
    /// Correlation key for externally synced accounts; defaults to the
    /// email.
    pub external_id: Option<String>,
}

/// Orchestrates credential verification, membership state checks, and
/// token issuance.
pub struct AuthService<S> {
    store: S,
    hasher: PasswordHasher,
    tokens: TokenIssuer,
}

impl<S> AuthService<S>
where
    S: UserStore + OrganizationStore + MembershipStore,
{
    pub fn new(store: S, hasher: PasswordHasher, tokens: TokenIssuer) -> Self {
        Self {
            store,
            hasher,
            tokens,
        }
    }

    /// Wire up hasher and token issuer from configuration.
    pub fn from_config(store: S, config: &Config) -> Self {
        let hasher =
            PasswordHasher::new(config.password).with_pepper(config.password_pepper.clone());
        Self::new(store, hasher, TokenIssuer::from_config(config))
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Central login against the user's own credential.
    ///
    /// Every failure — unknown email, disabled account, unset password,
    /// wrong password — produces the same `Unauthorized` error, so an
    /// attacker cannot enumerate accounts. Legacy peppered credentials are
    /// accepted via the fallback scheme and transparently re-hashed under
    /// the standard one.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<CentralSession> {
        let email = email.trim().to_lowercase();

        let user = match self.store.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                // Burn a hash so the absent-user path costs about the same
                // as a wrong password.
                let _ = self.hasher.hash("dummy");
                return Err(Error::invalid_credentials());
            }
        };

        if !user.is_active {
            return Err(Error::invalid_credentials());
        }
        let Some(stored) = user.password.as_deref() else {
            return Err(Error::invalid_credentials());
        };

        match self.hasher.verify_any(password, stored) {
            None => return Err(Error::invalid_credentials()),
            Some(CredentialScheme::Peppered) => {
                let upgraded = self.hasher.hash(password)?;
                self.store.set_user_password(user.id, &upgraded).await?;
                debug!(user_id = user.id, "legacy peppered credential re-hashed");
            }
            Some(CredentialScheme::Standard) => {}
        }

        let (organizations, institutes) = self.user_organizations(user.id).await?;
        let signed = self.tokens.issue_central(user.id, &user.email, institutes)?;

        info!(user_id = user.id, "central login succeeded");
        Ok(CentralSession {
            access_token: signed.token,
            expires_in: signed.expires_in,
            user: UserProfile {
                id: user.id,
                email: user.email,
                first_name: user.first_name,
                last_name: user.last_name,
                user_type: user.user_type,
                organizations,
            },
        })
    }

    /// Login into a specific organization context using the
    /// organization-scoped credential.
    ///
    /// The membership is resolved institute-first; it must be active and
    /// approved, and the password is checked against the membership's own
    /// hash, never the central one.
    #[instrument(skip(self, password))]
    pub async fn login_to_organization(
        &self,
        user_id: i64,
        organization_id: i64,
        password: &str,
    ) -> Result<OrgSession> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| Error::unauthorized(ORG_LOGIN_FAILED))?;

        let membership = self
            .store
            .find_membership(user_id, organization_id)
            .await?
            .ok_or_else(|| Error::unauthorized(ORG_LOGIN_FAILED))?;

        if !membership.is_live() {
            return Err(Error::unauthorized(ORG_LOGIN_FAILED));
        }
        if !self
            .hasher
            .verify(password, &membership.record().hashed_password)
        {
            return Err(Error::unauthorized(ORG_LOGIN_FAILED));
        }

        let role = membership.role();
        let (organization, institute_id) = self.organization_summary(&membership, role).await?;

        let signed = self.tokens.issue_tenant(
            user.id,
            &user.email,
            membership.kind(),
            organization_id,
            role,
            institute_id,
        )?;

        info!(
            user_id,
            organization_id,
            kind = %membership.kind(),
            "organization login succeeded"
        );
        Ok(OrgSession {
            access_token: signed.token,
            expires_in: signed.expires_in,
            user: OrgSessionUser {
                id: user.id,
                email: user.email,
                first_name: user.first_name,
                last_name: user.last_name,
                role,
                organization,
            },
        })
    }

    /// Register a new user with a central credential.
    ///
    /// Uniqueness of email, username, and external id is enforced by the
    /// store constraint, which is authoritative; duplicates surface as
    /// `Conflict`.
    #[instrument(skip(self, request))]
    pub async fn create_user(&self, request: NewUserRequest) -> Result<User> {
        let email = request.email.trim().to_lowercase();
        let password = self.hasher.hash(&request.password)?;

        let user = self
            .store
            .create_user(NewUser {
                external_id: request.external_id.unwrap_or_else(|| email.clone()),
                email,
                username: request.username,
                first_name: request.first_name,
                last_name: request.last_name,
                password: Some(password),
                user_type: request.user_type.unwrap_or_default(),
            })
            .await?;

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Change the central password, re-verifying the current one first.
    #[instrument(skip(self, current, new))]
    pub async fn change_password(&self, user_id: i64, current: &str, new: &str) -> Result<()> {
        let stored = self
            .store
            .find_user(user_id)
            .await?
            .and_then(|u| u.password)
            .ok_or_else(|| Error::unauthorized("User not found or no password set"))?;

        if !self.hasher.verify(current, &stored) {
            return Err(Error::unauthorized("Current password is incorrect"));
        }

        let hash = self.hasher.hash(new)?;
        self.store.set_user_password(user_id, &hash).await?;
        info!(user_id, "central password changed");
        Ok(())
    }

    /// Administrative central-password set, for accounts created by sync
    /// that have no credential yet.
    #[instrument(skip(self, password))]
    pub async fn set_user_password(&self, user_id: i64, password: &str) -> Result<()> {
        let hash = self.hasher.hash(password)?;
        self.store.set_user_password(user_id, &hash).await?;
        info!(user_id, "central password set");
        Ok(())
    }

    /// Approved memberships grouped by type, plus the institute-id claim
    /// set for the token.
    async fn user_organizations(&self, user_id: i64) -> Result<(UserOrganizations, Vec<i64>)> {
        let mut organizations = UserOrganizations::default();
        let mut institutes = Vec::new();

        for row in self
            .store
            .list_user_memberships(OrgKind::Institute, user_id)
            .await?
        {
            if !row.is_live() {
                continue;
            }
            let Some(org) = self.store.find_institute_org(row.organization_id).await? else {
                continue;
            };
            institutes.push(org.institute_id);
            let institute = self.institute_summary(org.institute_id).await?;
            organizations.institute.push(OrganizationSummary {
                id: org.id,
                name: org.name,
                role: row.role,
                institute: Some(institute),
            });
        }

        for row in self
            .store
            .list_user_memberships(OrgKind::Global, user_id)
            .await?
        {
            if !row.is_live() {
                continue;
            }
            let Some(org) = self.store.find_global_org(row.organization_id).await? else {
                continue;
            };
            organizations.global.push(OrganizationSummary {
                id: org.id,
                name: org.name,
                role: row.role,
                institute: None,
            });
        }

        institutes.sort_unstable();
        institutes.dedup();
        Ok((organizations, institutes))
    }

    async fn organization_summary(
        &self,
        membership: &Membership,
        role: OrgRole,
    ) -> Result<(OrganizationSummary, Option<i64>)> {
        let organization_id = membership.organization_id();
        match membership.kind() {
            OrgKind::Institute => {
                let org = self
                    .store
                    .find_institute_org(organization_id)
                    .await?
                    .ok_or_else(|| {
                        Error::internal("membership references a missing organization")
                    })?;
                let institute = self.institute_summary(org.institute_id).await?;
                Ok((
                    OrganizationSummary {
                        id: org.id,
                        name: org.name,
                        role,
                        institute: Some(institute),
                    },
                    Some(org.institute_id),
                ))
            }
            OrgKind::Global => {
                let org = self
                    .store
                    .find_global_org(organization_id)
                    .await?
                    .ok_or_else(|| {
                        Error::internal("membership references a missing organization")
                    })?;
                Ok((
                    OrganizationSummary {
                        id: org.id,
                        name: org.name,
                        role,
                        institute: None,
                    },
                    None,
                ))
            }
        }
    }

    async fn institute_summary(&self, institute_id: i64) -> Result<InstituteSummary> {
        let name = self
            .store
            .find_institute(institute_id)
            .await?
            .map(|i| i.name)
            .unwrap_or_default();
        Ok(InstituteSummary {
            id: institute_id,
            name,
        })
    }
}
