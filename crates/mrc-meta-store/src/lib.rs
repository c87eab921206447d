//! MRC Metadata Store - persistent file and volume metadata
//!
//! This crate stores volumes, file metadata (including each file's replica
//! list and reconfiguration lock) and the OSD registry in a redb database.
//! All metadata changes of one operation are applied through a single
//! [`AtomicMetadataUpdate`].

pub mod error;
pub mod storage_manager;
pub mod store;
pub mod tables;
pub mod types;
pub mod update;

// Re-exports
pub use error::{MetaStoreError, MetaStoreResult};
pub use storage_manager::StorageManager;
pub use store::MetaStore;
pub use types::{FileMetadata, VolumeInfo, XLocSetLockState};
pub use update::{AtomicMetadataUpdate, Mutation};
