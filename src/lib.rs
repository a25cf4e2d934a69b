//! Clubdesk — multi-tenant membership and authentication core.
//!
//! Clubdesk manages user membership in campus organizations: users join
//! institute-scoped or global organizations with an enrollment key, may go
//! through a human verification step, and authenticate either centrally or
//! into a specific organization context with its own credential. Signed
//! session tokens carry identity plus an optional tenant context; a guard
//! re-checks membership state on every request.
//!
//! # Components
//!
//! - [`auth::PasswordHasher`] — bcrypt credential hashing with a legacy
//!   scheme fallback
//! - [`org::MembershipLedger`] — enrollment, verification, role, and
//!   deactivation transitions
//! - [`auth::TokenIssuer`] — HS256 session tokens with tenant claims
//! - [`auth::AuthService`] — central and per-organization login flows
//! - [`auth::AuthorizationGuard`] — the per-request `decide` policy
//!
//! Persistence is a collaborator: implement the [`org::storage`] traits
//! for your database. An in-memory implementation ships behind the
//! `test-stores` feature.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use clubdesk::{auth::AuthService, Config};
//!
//! clubdesk::init_tracing();
//! let config = Config::from_env()?;
//! let service = AuthService::from_config(store, &config);
//!
//! let session = service.login("user@example.com", "password").await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod org;

pub use config::Config;
pub use error::{Error, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults.
///
/// Call early in `main()`, before serving requests.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log level filter (e.g. "info", "clubdesk=debug")
/// - `CLUBDESK_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("CLUBDESK_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
