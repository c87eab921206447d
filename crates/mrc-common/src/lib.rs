//! MRC Common - Shared types and utilities
//!
//! This crate provides the error type, the replica-location value types and
//! the configuration structures used across all MRC components.

pub mod config;
pub mod error;
pub mod types;

pub use config::MrcConfig;
pub use error::{Error, Result};
pub use types::*;
