//! Session token issuance and verification.
//!
//! Tokens are compact HS256 JWTs signed with a process-wide secret loaded
//! at startup. The server keeps no session state: a token is valid for its
//! full lifetime once issued, and rotating the secret invalidates every
//! outstanding token. Claims carry identity plus an optional tenant
//! context; verification checks signature and expiry only — membership
//! state is re-resolved per request by the authorization guard, never
//! trusted from the token.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::org::types::{OrgKind, OrgRole};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Scope tag carried in the `organization_type` claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScope {
    /// Authenticated against the central user credential; no active
    /// organization context.
    Central,
    /// Acting within an institute organization.
    Institute,
    /// Acting within a global organization.
    Global,
}

impl From<OrgKind> for AuthScope {
    fn from(kind: OrgKind) -> Self {
        match kind {
            OrgKind::Institute => Self::Institute,
            OrgKind::Global => Self::Global,
        }
    }
}

/// Claims embedded in a session token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject user id.
    pub sub: i64,
    pub email: String,
    /// Institute ids the user is an approved member of. Populated for
    /// central login; for institute-organization login it holds the single
    /// owning institute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institutes: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_type: Option<AuthScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<i64>,
    /// Role at issuance time. Advisory only; guards re-derive the current
    /// role from the membership ledger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<OrgRole>,
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

impl SessionClaims {
    /// Resolve the optional claim fields into an explicit tenant context.
    ///
    /// Returns `None` when the fields are inconsistent (e.g. an
    /// organization scope without an organization id), which only happens
    /// for tokens this service did not mint.
    #[must_use]
    pub fn tenant(&self) -> Option<TenantContext> {
        match self.organization_type? {
            AuthScope::Central => Some(TenantContext::Central {
                institutes: self.institutes.clone().unwrap_or_default(),
            }),
            AuthScope::Institute => Some(TenantContext::Institute {
                organization_id: self.organization_id?,
                role: self.role?,
            }),
            AuthScope::Global => Some(TenantContext::Global {
                organization_id: self.organization_id?,
                role: self.role?,
            }),
        }
    }
}

/// The tenant context a session is acting within.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TenantContext {
    /// Central session: no active organization, institute ids as claims.
    Central { institutes: Vec<i64> },
    /// Session scoped to an institute organization.
    Institute { organization_id: i64, role: OrgRole },
    /// Session scoped to a global organization.
    Global { organization_id: i64, role: OrgRole },
}

/// A freshly signed token plus its lifetime in seconds.
#[derive(Clone, Debug, Serialize)]
pub struct SignedToken {
    pub token: String,
    pub expires_in: u64,
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, issuer: impl Into<String>, ttl: Duration) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[issuer.clone()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.jwt_secret, config.issuer.clone(), config.jwt_ttl)
    }

    /// Issue a central-login token: institute claims, no active tenant.
    pub fn issue_central(
        &self,
        user_id: i64,
        email: &str,
        institutes: Vec<i64>,
    ) -> Result<SignedToken> {
        self.sign(SessionClaims {
            sub: user_id,
            email: email.to_string(),
            institutes: Some(institutes),
            organization_type: Some(AuthScope::Central),
            organization_id: None,
            role: None,
            iss: self.issuer.clone(),
            iat: 0,
            exp: 0,
            jti: String::new(),
        })
    }

    /// Issue an organization-login token carrying the active tenant
    /// context. `institute_id` is the owning institute for
    /// institute-scoped memberships.
    pub fn issue_tenant(
        &self,
        user_id: i64,
        email: &str,
        kind: OrgKind,
        organization_id: i64,
        role: OrgRole,
        institute_id: Option<i64>,
    ) -> Result<SignedToken> {
        self.sign(SessionClaims {
            sub: user_id,
            email: email.to_string(),
            institutes: institute_id.map(|id| vec![id]),
            organization_type: Some(kind.into()),
            organization_id: Some(organization_id),
            role: Some(role),
            iss: self.issuer.clone(),
            iat: 0,
            exp: 0,
            jti: String::new(),
        })
    }

    fn sign(&self, mut claims: SessionClaims) -> Result<SignedToken> {
        let now = current_timestamp();
        claims.iat = now;
        claims.exp = now + self.ttl.as_secs();
        claims.jti = generate_jti();

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::internal(format!("failed to encode token: {e}")))?;

        Ok(SignedToken {
            token,
            expires_in: self.ttl.as_secs(),
        })
    }

    /// Verify a token and return its claims.
    ///
    /// Signature mismatch, malformed payload, wrong issuer, and elapsed
    /// expiry all collapse into the same `InvalidToken` kind.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| Error::invalid_token(e.to_string()))
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn generate_jti() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
