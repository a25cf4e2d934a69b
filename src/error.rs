//! Error types shared across the crate.
//!
//! Every fallible operation returns [`Error`], which carries a stable,
//! machine-checkable kind plus a human-readable message. Credential and
//! token failures deliberately use generic messages so callers cannot
//! distinguish which factor failed.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// The main error type for clubdesk operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad credentials, disabled account, missing password, or an
    /// unauthenticated request.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but lacking the membership or role required.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Uniqueness violation: duplicate enrollment, email, username, or
    /// enrollment key.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Referenced user, organization, or membership does not exist or is
    /// inactive where an active one is required.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed, tampered, or expired session token. Treated like
    /// `Unauthorized` by callers.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Missing or unusable configuration. Raised at startup, never during
    /// request handling.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backing-store operation failed. The message never reaches
    /// response bodies.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The single generic login failure. Used for every central-login
    /// rejection so an absent account is indistinguishable from a wrong
    /// password.
    pub fn invalid_credentials() -> Self {
        Self::Unauthorized("Invalid email or password".into())
    }

    /// Stable kind tag for API consumers and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::InvalidToken(_) => "invalid_token",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Config(_) | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Standard error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures keep their detail out of the response body.
        let message = match &self {
            Self::Config(_) | Self::Storage(_) | Self::Internal(_) => {
                tracing::error!(kind = self.kind(), error = %self, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            kind: self.kind(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
