//! Error types for warden.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Moderation Errors ===
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Enforcement failure: {0}")]
    EnforcementFailure(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Session rejected: {0}")]
    SessionRejected(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // === Infrastructure Errors ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code used in logs and audit details.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::DuplicateEvent(_) => "DUPLICATE_EVENT",
            Self::InvalidTarget(_) => "INVALID_TARGET",
            Self::EnforcementFailure(_) => "ENFORCEMENT_FAILURE",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionRejected(_) => "SESSION_REJECTED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::Database(_)
                | Self::Config(_)
                | Self::Internal(_)
        )
    }

    /// Returns whether the user may safely retry the triggering action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::Database(_) | Self::Transport(_)
        )
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_transient_server_errors() {
        let err = AppError::from(sea_orm::DbErr::Custom("connection refused".to_string()));
        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
        assert!(err.is_server_error());
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_errors_are_not_server_errors() {
        assert!(!AppError::Unauthorized.is_server_error());
        assert!(!AppError::InvalidTarget("no reply".to_string()).is_server_error());
        assert!(!AppError::SessionExpired.is_transient());
    }
}
