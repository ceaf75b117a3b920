use dog_tenancy::TenancyError;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote store calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors surfaced by the cache, reconciler and mutation gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Never retried
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Network or remote store failure, retried with backoff by the reconciler
    #[error("Retryable transport error: {0}")]
    RetryableTransport(String),

    /// Local partition state violates an invariant; the partition is rebuilt
    #[error("Cache corruption: {0}")]
    FatalCacheCorruption(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Partition {partition} is leased by {holder}")]
    LeaseHeld { partition: String, holder: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reconciler shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::FatalCacheCorruption(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Check if the reconciler should retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableTransport(_) | Self::Timeout(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::FatalCacheCorruption(_))
    }
}

impl From<TenancyError> for SyncError {
    fn from(err: TenancyError) -> Self {
        match err {
            TenancyError::NotFound(msg) => Self::NotFound(msg),
            TenancyError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            TenancyError::Conflict(msg) => Self::Conflict(msg),
            TenancyError::Retryable(msg) => Self::RetryableTransport(msg),
            TenancyError::Invalid(msg) => Self::InvalidPayload(msg),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Failures reported by a [`RemoteStore`](crate::remote::RemoteStore)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call timed out: {0}")]
    Timeout(String),

    /// The store refused the write outright; the local mutation is compensated
    #[error("Remote store rejected write: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) => Self::RetryableTransport(msg),
            RemoteError::Timeout(msg) => Self::Timeout(msg),
            RemoteError::Rejected(msg) => Self::Conflict(format!("remote rejected write: {msg}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenancy_errors_keep_their_class() {
        let err: SyncError = TenancyError::permission_denied("nope").into();
        assert!(matches!(err, SyncError::PermissionDenied(_)));
        assert!(!err.is_retryable());

        let err: SyncError = TenancyError::retryable("down").into();
        assert!(err.is_retryable());
    }

    #[test]
    fn remote_rejection_is_not_retryable() {
        assert!(RemoteError::unavailable("x").is_retryable());
        let err: SyncError = RemoteError::rejected("bad").into();
        assert!(!err.is_retryable());
    }
}
