//! Credential hashing and verification.
//!
//! Passwords are hashed with bcrypt using a configurable work factor.
//! Central user credentials and organization-scoped credentials go through
//! the same hasher but are always hashed independently, so one stored hash
//! reveals nothing about the other.
//!
//! A legacy "peppered" scheme survives from an old credential migration:
//! the plaintext was suffixed with the first 16 characters of a
//! server-side key before hashing. Stored rows carry no scheme tag, so
//! [`PasswordHasher::verify_any`] tries the standard scheme first and the
//! peppered scheme second, reporting which one matched.
//!
//! # Example
//!
//! ```rust,ignore
//! use clubdesk::auth::{PasswordConfig, PasswordHasher};
//!
//! let hasher = PasswordHasher::new(PasswordConfig::default());
//! let stored = hasher.hash("correct-horse-battery-staple")?;
//! assert!(hasher.verify("correct-horse-battery-staple", &stored));
//! ```

use crate::error::{Error, Result};

/// Configuration for credential hashing.
#[derive(Clone, Copy, Debug)]
pub struct PasswordConfig {
    /// bcrypt work factor. Valid range 4..=31; values outside it fall back
    /// to the default rather than failing.
    pub cost: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordConfig {
    /// Create a config with the given work factor, replacing out-of-range
    /// values with the default.
    #[must_use]
    pub fn new(cost: u32) -> Self {
        if !(4..=31).contains(&cost) {
            tracing::warn!(cost, "bcrypt cost out of range, using default");
            return Self::default();
        }
        Self { cost }
    }

    /// Cheapest legal settings, for tests only.
    #[cfg(any(test, debug_assertions))]
    #[must_use]
    pub fn fast() -> Self {
        Self { cost: 4 }
    }
}

/// Which hashing scheme a stored credential matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialScheme {
    /// Plain bcrypt over the password.
    Standard,
    /// bcrypt over password + server-side pepper prefix. Legacy rows only;
    /// new credentials are never written under this scheme.
    Peppered,
}

/// Hashes and verifies credentials. Stateless and safe to share across
/// concurrent requests.
#[derive(Clone)]
pub struct PasswordHasher {
    config: PasswordConfig,
    pepper: Option<String>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(PasswordConfig::default())
    }
}

impl PasswordHasher {
    #[must_use]
    pub fn new(config: PasswordConfig) -> Self {
        Self {
            config,
            pepper: None,
        }
    }

    /// Enable the legacy peppered fallback scheme.
    #[must_use]
    pub fn with_pepper(mut self, pepper: Option<String>) -> Self {
        self.pepper = pepper.filter(|p| !p.is_empty());
        self
    }

    /// Hash a password under the standard scheme.
    ///
    /// bcrypt salts internally, so hashing the same input twice yields two
    /// different stored values that both verify.
    pub fn hash(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.config.cost)
            .map_err(|e| Error::internal(format!("password hashing failed: {e}")))
    }

    /// Verify a password against a stored standard-scheme hash.
    ///
    /// Never errors: a malformed stored hash verifies as `false`.
    #[must_use]
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        bcrypt::verify(password, stored).unwrap_or(false)
    }

    /// Hash a password under the legacy peppered scheme.
    ///
    /// Only the migration-era write path uses this; it errors when no
    /// pepper is configured.
    pub fn hash_peppered(&self, password: &str) -> Result<String> {
        let peppered = self
            .peppered(password)
            .ok_or_else(|| Error::config("password pepper is not configured"))?;
        self.hash(&peppered)
    }

    /// Verify a password against a stored hash of unknown scheme.
    ///
    /// Tries the standard scheme first; on failure, and only when a pepper
    /// is configured, tries the peppered scheme. A correct password hashed
    /// under one scheme safely fails the other's comparison. Returns the
    /// scheme that matched so callers can upgrade legacy rows.
    #[must_use]
    pub fn verify_any(&self, password: &str, stored: &str) -> Option<CredentialScheme> {
        if self.verify(password, stored) {
            return Some(CredentialScheme::Standard);
        }
        if let Some(peppered) = self.peppered(password) {
            if self.verify(&peppered, stored) {
                return Some(CredentialScheme::Peppered);
            }
        }
        None
    }

    fn peppered(&self, password: &str) -> Option<String> {
        self.pepper.as_ref().map(|pepper| {
            let prefix: String = pepper.chars().take(16).collect();
            format!("{password}{prefix}")
        })
    }
}
