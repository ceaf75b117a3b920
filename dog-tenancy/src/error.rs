use thiserror::Error;

/// Result type for tenancy operations
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Errors raised by the tenant directory, membership store and access layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenancyError {
    /// Absent tenant or membership
    #[error("Not found: {0}")]
    NotFound(String),

    /// The actor lacks the role required for the operation. Never retried.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A (tenant, user) membership row already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend or network failure; distinct from `NotFound`
    #[error("Retryable transport error: {0}")]
    Retryable(String),

    #[error("Invalid input: {0}")]
    Invalid(String),
}

impl TenancyError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
