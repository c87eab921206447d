//! MRC Placement - OSD registry and replica placement
//!
//! The registry tracks the OSDs known to the MRC. Replica OSDs are chosen
//! with rendezvous (HRW) hashing over the usable OSDs, spreading a
//! replica's stripes across failure domains where possible.
//!
//! # Example
//! ```ignore
//! use mrc_placement::{OsdRegistry, OsdInfo};
//!
//! let registry = OsdRegistry::new();
//! registry.upsert(OsdInfo::new("osd-1", "http://10.0.0.1:32640", "rack-1"));
//! let osds = registry.select("vol:42", 1, &HashSet::new())?;
//! ```

pub mod error;
pub mod registry;
pub mod selector;

pub use error::PlacementError;
pub use registry::{OsdInfo, OsdRegistry, OsdStatus};
