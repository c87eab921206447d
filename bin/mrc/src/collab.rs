//! Collaborator seams: caller identity, privilege checks and vouchers
//!
//! The POSIX permission model and quota accounting live outside this
//! server; operations call these hooks at fixed points so an external
//! implementation can be plugged in.

use mrc_common::{Error, Result};
use mrc_meta_store::{FileMetadata, VolumeInfo};
use serde::{Deserialize, Serialize};

/// Identity of the caller of an operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: String,
    pub group_ids: Vec<String>,
    pub super_user: bool,
    /// Network identity of the client, e.g. its IP address
    pub client_address: String,
}

impl RequestContext {
    /// Context of requests the server issues to itself
    #[must_use]
    pub fn internal(server_uuid: &str) -> Self {
        Self {
            user_id: server_uuid.to_string(),
            group_ids: Vec::new(),
            super_user: true,
            client_address: server_uuid.to_string(),
        }
    }
}

/// Decides who may reconfigure a file's replicas
pub trait PermissionChecker: Send + Sync {
    fn check_privileged(
        &self,
        volume: &VolumeInfo,
        file: &FileMetadata,
        ctx: &RequestContext,
    ) -> Result<()>;
}

/// Grants privileged operations to the file owner and to super users
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerOrSuperuser;

impl PermissionChecker for OwnerOrSuperuser {
    fn check_privileged(
        &self,
        volume: &VolumeInfo,
        file: &FileMetadata,
        ctx: &RequestContext,
    ) -> Result<()> {
        if ctx.super_user || ctx.user_id == file.owner {
            Ok(())
        } else {
            Err(Error::permission_denied(format!(
                "no privileged permissions for {}:{} as user '{}'",
                volume.name, file.path, ctx.user_id
            )))
        }
    }
}

/// Quota hooks around changes that alter how many bytes a file occupies
pub trait VoucherManager: Send + Sync {
    /// Called before a replica addition is committed
    fn check_add_replica(&self, _volume: &VolumeInfo, _file: &FileMetadata) -> Result<()> {
        Ok(())
    }

    /// Called before a replica removal is committed
    fn remove_replica(&self, _volume: &VolumeInfo, _file: &FileMetadata) -> Result<()> {
        Ok(())
    }

    /// Size voucher handed out with a write capability
    fn issue_voucher(
        &self,
        _volume: &VolumeInfo,
        _file: &FileMetadata,
        _ctx: &RequestContext,
    ) -> Result<u64> {
        Ok(0)
    }
}

/// No quota enforcement
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVouchers;

impl VoucherManager for NoVouchers {}
