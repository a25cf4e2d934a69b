//! Environment-driven configuration.
//!
//! All settings live under the `CLUBDESK_` prefix. The token signing
//! secret is mandatory and missing it is a startup error; every other
//! setting falls back to a safe default.
//!
//! | Variable                   | Default     | Purpose                          |
//! |----------------------------|-------------|----------------------------------|
//! | `CLUBDESK_JWT_SECRET`      | *required*  | HMAC secret for session tokens   |
//! | `CLUBDESK_JWT_TTL_SECS`    | `86400`     | Token lifetime in seconds        |
//! | `CLUBDESK_TOKEN_ISSUER`    | `clubdesk`  | `iss` claim                      |
//! | `CLUBDESK_PASSWORD_COST`   | `12`        | bcrypt work factor (4..=31)      |
//! | `CLUBDESK_PASSWORD_PEPPER` | *unset*     | legacy peppered-scheme key       |

use crate::auth::password::PasswordConfig;
use crate::error::{Error, Result};
use std::time::Duration;

const ENV_PREFIX: &str = "CLUBDESK_";

const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_ISSUER: &str = "clubdesk";

/// Runtime configuration for the auth core.
#[derive(Clone)]
pub struct Config {
    /// Symmetric signing secret for session tokens. Process-wide,
    /// read-only after startup; rotating it invalidates all issued tokens.
    pub jwt_secret: String,
    /// Session token lifetime.
    pub jwt_ttl: Duration,
    /// Value of the `iss` claim.
    pub issuer: String,
    /// Credential hashing settings.
    pub password: PasswordConfig,
    /// Server-side key for the legacy peppered hashing scheme. When unset,
    /// the fallback verification path is disabled.
    pub password_pepper: Option<String>,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Fails only when `CLUBDESK_JWT_SECRET` is absent or empty; malformed
    /// optional settings are logged and replaced with their defaults.
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env_var("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("CLUBDESK_JWT_SECRET must be set"))?;

        let jwt_ttl = Duration::from_secs(parse_or_default(
            "JWT_TTL_SECS",
            DEFAULT_TTL_SECS,
        ));

        let cost = parse_or_default("PASSWORD_COST", PasswordConfig::default().cost);
        let password = PasswordConfig::new(cost);

        Ok(Self {
            jwt_secret,
            jwt_ttl,
            issuer: env_var("TOKEN_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            password,
            password_pepper: env_var("PASSWORD_PEPPER").filter(|s| !s.is_empty()),
        })
    }

    /// Configuration with explicit values, for embedding and tests.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            jwt_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            issuer: DEFAULT_ISSUER.to_string(),
            password: PasswordConfig::default(),
            password_pepper: None,
        }
    }

    /// Set the token lifetime.
    pub fn jwt_ttl(mut self, ttl: Duration) -> Self {
        self.jwt_ttl = ttl;
        self
    }

    /// Set the password hashing settings.
    pub fn password(mut self, config: PasswordConfig) -> Self {
        self.password = config;
        self
    }

    /// Set the legacy pepper key.
    pub fn password_pepper(mut self, pepper: impl Into<String>) -> Self {
        self.password_pepper = Some(pepper.into());
        self
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of debug output.
        f.debug_struct("Config")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_ttl", &self.jwt_ttl)
            .field("issuer", &self.issuer)
            .field("password", &self.password)
            .field(
                "password_pepper",
                &self.password_pepper.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parse_or_default<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(
                setting = name,
                value = %raw,
                "unparseable setting, using default"
            );
            default
        }),
        None => default,
    }
}
