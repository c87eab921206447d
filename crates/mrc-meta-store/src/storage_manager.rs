//! Volume-scoped view of the metadata store
//!
//! Operation handlers read file snapshots through a [`StorageManager`] and
//! stage their changes in an [`AtomicMetadataUpdate`] obtained from it.

use crate::error::MetaStoreResult;
use crate::store::MetaStore;
use crate::types::{FileMetadata, VolumeInfo};
use crate::update::AtomicMetadataUpdate;
use mrc_common::{UpdatePolicy, XLoc, XLocList};
use std::sync::Arc;

pub struct StorageManager {
    store: Arc<MetaStore>,
    volume: VolumeInfo,
}

impl StorageManager {
    /// Open the view of `volume_id`, `None` if there is no such volume
    pub fn open(store: Arc<MetaStore>, volume_id: &str) -> MetaStoreResult<Option<Self>> {
        Ok(store
            .get_volume(volume_id)?
            .map(|volume| Self { store, volume }))
    }

    /// Open the view of the volume called `name`
    pub fn open_by_name(store: Arc<MetaStore>, name: &str) -> MetaStoreResult<Option<Self>> {
        Ok(store
            .volume_by_name(name)?
            .map(|volume| Self { store, volume }))
    }

    #[must_use]
    pub const fn volume(&self) -> &VolumeInfo {
        &self.volume
    }

    #[must_use]
    pub fn volume_id(&self) -> &str {
        &self.volume.id
    }

    pub fn get_metadata(&self, file_id: u64) -> MetaStoreResult<Option<FileMetadata>> {
        self.store.get_file(&self.volume.id, file_id)
    }

    pub fn resolve_path(&self, path: &str) -> MetaStoreResult<Option<FileMetadata>> {
        match self.store.lookup_path(&self.volume.id, path)? {
            Some(file_id) => self.get_metadata(file_id),
            None => Ok(None),
        }
    }

    /// Stage a new snapshot of `file` in `update`
    pub fn set_metadata<P>(&self, file: FileMetadata, update: &mut AtomicMetadataUpdate<P>) {
        update.put_file(&self.volume.id, file);
    }

    /// Build a validated replica list. Unreplicated files keep at most one
    /// replica.
    pub fn create_xloc_list(
        &self,
        replicas: Vec<XLoc>,
        update_policy: UpdatePolicy,
        version: u64,
    ) -> mrc_common::Result<XLocList> {
        if update_policy.is_none() && replicas.len() > 1 {
            return Err(mrc_common::Error::precondition_failed(format!(
                "a file without replica update policy can have at most one replica, got {}",
                replicas.len()
            )));
        }
        XLocList::new(replicas, update_policy, version)
    }

    #[must_use]
    pub fn create_atomic_update<P>(&self) -> AtomicMetadataUpdate<P> {
        AtomicMetadataUpdate::new(self.store.clone())
    }

    /// Stage a new regular file at `path` and return its metadata.
    ///
    /// Allocates the next file ID of the volume in the same update.
    pub fn create_file<P>(
        &mut self,
        path: &str,
        owner: &str,
        now_ms: u64,
        update: &mut AtomicMetadataUpdate<P>,
    ) -> FileMetadata {
        let file_id = self.volume.next_file_id;
        self.volume.next_file_id += 1;
        let file = FileMetadata::new_file(file_id, path, owner, now_ms);
        update.put_volume(self.volume.clone());
        update.put_file(&self.volume.id, file.clone());
        update.put_path(&self.volume.id, path, file_id);
        file
    }
}
