//! Capability error types

use thiserror::Error;

/// Reasons a capability is not accepted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XCapError {
    #[error("capability signature is not valid")]
    SignatureMismatch,

    #[error("capability signature is not hex encoded")]
    MalformedSignature,

    #[error("capability expired at {expired_at_ms} ms")]
    Expired { expired_at_ms: u64 },

    #[error("capability was renewed {limit} times already")]
    RenewalLimit { limit: u32 },
}

impl From<XCapError> for mrc_common::Error {
    fn from(e: XCapError) -> Self {
        Self::PermissionDenied(e.to_string())
    }
}
