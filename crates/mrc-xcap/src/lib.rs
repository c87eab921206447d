//! MRC capabilities
//!
//! A capability (XCap) is a signed, time-bounded grant of access to a single
//! file. The MRC issues it; OSDs verify the signature with the shared secret
//! and reject expired or forged tokens.

pub mod capability;
pub mod error;

pub use capability::{Capability, CapabilityParams, FileCredentials, now_millis};
pub use error::XCapError;
