//! Shared state of the processing stage

use crate::collab::{PermissionChecker, VoucherManager};
use crate::coordinator::{MrcUpdate, XLocSetCoordinator};
use crate::operations::FileRef;
use mrc_common::{Error, GlobalFileId, MrcConfig, Result};
use mrc_meta_store::{FileMetadata, MetaStore, StorageManager};
use mrc_placement::OsdRegistry;
use mrc_xcap::{Capability, CapabilityParams, now_millis};
use std::sync::Arc;

pub struct MrcContext {
    pub config: MrcConfig,
    pub store: Arc<MetaStore>,
    pub osds: Arc<OsdRegistry>,
    pub coordinator: XLocSetCoordinator,
    pub permissions: Arc<dyn PermissionChecker>,
    pub vouchers: Arc<dyn VoucherManager>,
}

impl MrcContext {
    /// Fail with a redirect when another MRC is the replication master.
    pub fn check_master(&self) -> Result<()> {
        match self.config.redirect_target() {
            Some(master) => Err(Error::Redirect {
                master: master.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn volume(&self, volume_id: &str) -> Result<StorageManager> {
        StorageManager::open(self.store.clone(), volume_id)?
            .ok_or_else(|| Error::not_found(format!("volume {volume_id}")))
    }

    pub fn volume_by_name(&self, name: &str) -> Result<StorageManager> {
        StorageManager::open_by_name(self.store.clone(), name)?
            .ok_or_else(|| Error::not_found(format!("volume '{name}'")))
    }

    /// Load the volume view and metadata of the referenced file.
    pub fn resolve(&self, file: &FileRef) -> Result<(StorageManager, FileMetadata)> {
        match (&file.file_id, &file.volume, &file.path) {
            (Some(file_id), _, _) => {
                let id: GlobalFileId = file_id.parse()?;
                let sm = self.volume(&id.volume_id)?;
                let metadata = sm
                    .get_metadata(id.file_id)?
                    .ok_or_else(|| Error::not_found(format!("file {id}")))?;
                Ok((sm, metadata))
            }
            (None, Some(volume), Some(path)) => {
                let sm = self.volume_by_name(volume)?;
                let metadata = sm
                    .resolve_path(path)?
                    .ok_or_else(|| Error::not_found(format!("{volume}:{path}")))?;
                Ok((sm, metadata))
            }
            _ => Err(Error::invalid_argument(
                "either a file ID or a volume and path must be given",
            )),
        }
    }

    /// Commit `update` and hand every continuation it carries to the coordinator.
    pub fn commit(&self, update: MrcUpdate) -> Result<()> {
        for change in update.commit()? {
            self.coordinator.submit(change);
        }
        Ok(())
    }

    /// Sign a capability with the configured secret and validity
    #[must_use]
    pub fn issue_capability(&self, params: CapabilityParams) -> Capability {
        Capability::issue(params, now_millis(), &self.config.capability.secret)
    }
}
