//! Persisted metadata types
//!
//! Values read from the store are snapshots. A change is expressed by
//! deriving a new value (the `with_*` builders) and handing it to an
//! [`AtomicMetadataUpdate`](crate::AtomicMetadataUpdate).

use mrc_common::{GlobalFileId, ReplicationPolicy, StripingPolicy, UpdatePolicy, XLocList};
use serde::{Deserialize, Serialize};

/// Persisted state of a file's replica-set reconfiguration lock
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum XLocSetLockState {
    #[default]
    Unlocked,
    /// A change to `target_version` was started by the server instance
    /// running in `owner_generation`.
    Locked {
        target_version: u64,
        owner_generation: u64,
        owner: String,
    },
}

impl XLocSetLockState {
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// Metadata of a file, directory or symlink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: u64,
    pub path: String,
    pub is_directory: bool,
    pub symlink_target: Option<String>,
    pub owner: String,
    pub size: u64,
    /// Truncate epoch acknowledged by the OSDs
    pub epoch: u64,
    /// Highest truncate epoch handed out in a capability
    pub issued_epoch: u64,
    pub read_only: bool,
    pub xloc_list: XLocList,
    pub xlocset_lock: XLocSetLockState,
    pub created_at_ms: u64,
}

impl FileMetadata {
    /// A new, empty regular file
    #[must_use]
    pub fn new_file(id: u64, path: impl Into<String>, owner: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id,
            path: path.into(),
            is_directory: false,
            symlink_target: None,
            owner: owner.into(),
            size: 0,
            epoch: 0,
            issued_epoch: 0,
            read_only: false,
            xloc_list: XLocList::empty(UpdatePolicy::None),
            xlocset_lock: XLocSetLockState::Unlocked,
            created_at_ms: now_ms,
        }
    }

    /// A new directory
    #[must_use]
    pub fn new_directory(
        id: u64,
        path: impl Into<String>,
        owner: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            is_directory: true,
            ..Self::new_file(id, path, owner, now_ms)
        }
    }

    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        self.symlink_target.is_some()
    }

    #[must_use]
    pub fn global_id(&self, volume_id: &str) -> GlobalFileId {
        GlobalFileId::new(volume_id, self.id)
    }

    #[must_use]
    pub fn with_xloc_list(self, xloc_list: XLocList) -> Self {
        Self { xloc_list, ..self }
    }

    #[must_use]
    pub fn with_lock(self, xlocset_lock: XLocSetLockState) -> Self {
        Self {
            xlocset_lock,
            ..self
        }
    }

    #[must_use]
    pub fn with_read_only(self, read_only: bool) -> Self {
        Self { read_only, ..self }
    }

    #[must_use]
    pub fn with_issued_epoch(self, issued_epoch: u64) -> Self {
        Self {
            issued_epoch,
            ..self
        }
    }

    #[must_use]
    pub fn with_size(self, size: u64) -> Self {
        Self { size, ..self }
    }
}

/// A volume and its defaults for new files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub created_at_ms: u64,
    pub snapshots_enabled: bool,
    pub default_striping_policy: StripingPolicy,
    pub default_replication_policy: ReplicationPolicy,
    /// Next file ID to hand out; ID 1 is the root directory
    pub next_file_id: u64,
}

impl VolumeInfo {
    pub const ROOT_DIR_ID: u64 = 1;

    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            owner: owner.into(),
            created_at_ms: now_ms,
            snapshots_enabled: false,
            default_striping_policy: StripingPolicy::default(),
            default_replication_policy: ReplicationPolicy::default(),
            next_file_id: Self::ROOT_DIR_ID + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_leave_source_untouched() {
        let file = FileMetadata::new_file(5, "/a", "alice", 0);
        let locked = file.clone().with_lock(XLocSetLockState::Locked {
            target_version: 1,
            owner_generation: 2,
            owner: "mrc".into(),
        });
        assert!(!file.xlocset_lock.is_locked());
        assert!(locked.xlocset_lock.is_locked());
        assert_eq!(locked.id, 5);
    }

    #[test]
    fn test_new_directory() {
        let dir = FileMetadata::new_directory(VolumeInfo::ROOT_DIR_ID, "/", "root", 0);
        assert!(dir.is_directory);
        assert!(!dir.is_symlink());
        assert_eq!(dir.global_id("vol").to_string(), "vol:1");
    }
}
