//! Placement errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlacementError {
    #[error("insufficient usable OSDs: have {available}, need {required}")]
    InsufficientOsds { available: usize, required: usize },

    #[error("OSD not registered: {0}")]
    UnknownOsd(String),

    #[error("OSD is not usable: {0}")]
    UnusableOsd(String),
}

impl From<PlacementError> for mrc_common::Error {
    fn from(e: PlacementError) -> Self {
        match e {
            PlacementError::InsufficientOsds { .. } => Self::PreconditionFailed(e.to_string()),
            PlacementError::UnknownOsd(_) | PlacementError::UnusableOsd(_) => {
                Self::InvalidArgument(e.to_string())
            }
        }
    }
}
