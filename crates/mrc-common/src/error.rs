//! Error types for the MRC
//!
//! Every operation handler fails fast with one of these kinds before any
//! metadata is mutated. Storage failures are surfaced verbatim.

use thiserror::Error;

/// Common result type for MRC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the MRC
#[derive(Debug, Error)]
pub enum Error {
    // Client-visible request errors
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("retry later: {0}")]
    RetryLater(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not the replication master, redirect to {master}")]
    Redirect { master: String },

    // Infrastructure errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("request timeout")]
    Timeout,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a permission denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a retry-later (conflict) error
    pub fn retry_later(msg: impl Into<String>) -> Self {
        Self::RetryLater(msg.into())
    }

    /// Create a precondition failed error
    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// POSIX errno reported to clients
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::PermissionDenied(_) | Self::PreconditionFailed(_) => 1, // EPERM
            Self::NotFound(_) => 2,                                       // ENOENT
            Self::RetryLater(_) => 11,                                    // EAGAIN
            Self::InvalidArgument(_) => 22,                               // EINVAL
            Self::Timeout => 110,                                         // ETIMEDOUT
            Self::Redirect { .. }
            | Self::Storage(_)
            | Self::ServiceUnavailable(_)
            | Self::Configuration(_)
            | Self::Internal(_) => 5, // EIO
        }
    }

    /// Get HTTP status code for the JSON API
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) => 400,
            Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::RetryLater(_) => 409,
            Self::PreconditionFailed(_) => 412,
            Self::Redirect { .. } => 421,

            Self::Internal(_) | Self::Storage(_) | Self::Configuration(_) => 500,

            Self::ServiceUnavailable(_) | Self::Timeout => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_http_status() {
        assert_eq!(Error::permission_denied("x").http_status_code(), 403);
        assert_eq!(Error::not_found("x").http_status_code(), 404);
        assert_eq!(Error::retry_later("x").http_status_code(), 409);
        assert_eq!(Error::precondition_failed("x").http_status_code(), 412);
        assert_eq!(
            Error::Redirect {
                master: "mrc-1".into()
            }
            .http_status_code(),
            421
        );
        assert_eq!(Error::Storage("x".into()).http_status_code(), 500);
        assert_eq!(Error::Timeout.http_status_code(), 503);
    }

    #[test]
    fn test_error_errno() {
        assert_eq!(Error::retry_later("x").errno(), 11);
        assert_eq!(Error::invalid_argument("x").errno(), 22);
        assert_eq!(Error::not_found("x").errno(), 2);
    }
}
