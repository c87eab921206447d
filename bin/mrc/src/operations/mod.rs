//! Metadata operations run by the processing stage
//!
//! Each operation validates against the current metadata snapshot, stages
//! its changes in one update and commits. Operations that change a file's
//! replica membership through the coordinator only lock the file here; the
//! new list is installed later by [`Request::InstallXLocSet`].

mod add_replica;
mod install;
mod open;
mod remove_replica;
mod reselect_osds;
mod update_policy;
mod xlocset;

pub use add_replica::{AddReplicaArgs, NewReplica};
pub use open::OpenArgs;
pub use remove_replica::RemoveReplicaArgs;
pub use reselect_osds::ReselectOsdsArgs;
pub use update_policy::SetReplicaUpdatePolicyArgs;
pub use xlocset::{GetXLocSetArgs, RenewCapabilityArgs};

use crate::collab::RequestContext;
use crate::context::MrcContext;
use crate::coordinator::XLocSetChange;
use crate::lock::XLocSetLock;
use derive_more::Display;
use mrc_common::{Error, GlobalFileId, Result, UpdatePolicy, XLocSet};
use mrc_meta_store::FileMetadata;
use mrc_xcap::{Capability, FileCredentials};
use serde::{Deserialize, Serialize};

/// Reference to a file, either by global ID or by volume name and path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl FileRef {
    #[must_use]
    pub fn by_id(file_id: &GlobalFileId) -> Self {
        Self {
            file_id: Some(file_id.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn by_path(volume: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            file_id: None,
            volume: Some(volume.into()),
            path: Some(path.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    AddReplica(AddReplicaArgs),
    RemoveReplica(RemoveReplicaArgs),
    ReselectOsds(ReselectOsdsArgs),
    SetReplicaUpdatePolicy(SetReplicaUpdatePolicyArgs),
    Open(OpenArgs),
    GetXLocSet(GetXLocSetArgs),
    RenewCapability(RenewCapabilityArgs),
    /// Internal: install the target list of a coordinated change
    InstallXLocSet(Box<XLocSetChange>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum OperationKind {
    #[display("xtreemfs_replica_add")]
    AddReplica,
    #[display("xtreemfs_replica_remove")]
    RemoveReplica,
    #[display("xtreemfs_reselect_osds")]
    ReselectOsds,
    #[display("xtreemfs_set_replica_update_policy")]
    SetReplicaUpdatePolicy,
    #[display("open")]
    Open,
    #[display("xtreemfs_get_xlocset")]
    GetXLocSet,
    #[display("xtreemfs_renew_capability")]
    RenewCapability,
    #[display("install_xlocset")]
    InstallXLocSet,
}

impl Request {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::AddReplica(_) => OperationKind::AddReplica,
            Self::RemoveReplica(_) => OperationKind::RemoveReplica,
            Self::ReselectOsds(_) => OperationKind::ReselectOsds,
            Self::SetReplicaUpdatePolicy(_) => OperationKind::SetReplicaUpdatePolicy,
            Self::Open(_) => OperationKind::Open,
            Self::GetXLocSet(_) => OperationKind::GetXLocSet,
            Self::RenewCapability(_) => OperationKind::RenewCapability,
            Self::InstallXLocSet(_) => OperationKind::InstallXLocSet,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Empty,
    Credentials(FileCredentials),
    XLocSet(XLocSet),
    UpdatePolicy { old_update_policy: UpdatePolicy },
    Capability(Capability),
}

/// Run `request` against the current metadata.
pub fn dispatch(ctx: &MrcContext, rq: &RequestContext, request: Request) -> Result<Response> {
    match request {
        Request::AddReplica(args) => add_replica::handle(ctx, rq, args),
        Request::RemoveReplica(args) => remove_replica::handle(ctx, rq, args),
        Request::ReselectOsds(args) => reselect_osds::handle(ctx, rq, args),
        Request::SetReplicaUpdatePolicy(args) => update_policy::handle(ctx, rq, args),
        Request::Open(args) => open::handle(ctx, rq, args),
        Request::GetXLocSet(args) => xlocset::get(ctx, args),
        Request::RenewCapability(args) => xlocset::renew(ctx, args),
        Request::InstallXLocSet(change) => install::handle(ctx, *change),
    }
}

/// Replica operations only apply to regular files.
fn check_replicable(file: &FileMetadata) -> Result<()> {
    if file.is_directory {
        return Err(Error::invalid_argument(format!("{} is a directory", file.path)));
    }
    if file.is_symlink() {
        return Err(Error::invalid_argument(format!("{} is a symlink", file.path)));
    }
    Ok(())
}

fn check_not_in_progress(file_id: &GlobalFileId, lock: &XLocSetLock) -> Result<()> {
    if lock.is_in_progress() {
        return Err(Error::retry_later(format!(
            "replica list of {file_id} is being changed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(OperationKind::AddReplica.to_string(), "xtreemfs_replica_add");
        assert_eq!(OperationKind::InstallXLocSet.to_string(), "install_xlocset");
    }

    #[test]
    fn test_file_ref_json() {
        let by_path: FileRef = serde_json::from_str(r#"{"volume":"v","path":"/a"}"#).unwrap();
        assert_eq!(by_path, FileRef::by_path("v", "/a"));

        let by_id = FileRef::by_id(&GlobalFileId::new("v", 7));
        assert_eq!(serde_json::to_string(&by_id).unwrap(), r#"{"file_id":"v:7"}"#);
    }

    #[test]
    fn test_directories_and_symlinks_are_not_replicable() {
        let dir = FileMetadata::new_directory(1, "/", "root", 0);
        assert!(matches!(check_replicable(&dir), Err(Error::InvalidArgument(_))));

        let mut link = FileMetadata::new_file(2, "/l", "root", 0);
        link.symlink_target = Some("/a".into());
        assert!(matches!(check_replicable(&link), Err(Error::InvalidArgument(_))));

        assert!(check_replicable(&FileMetadata::new_file(3, "/a", "root", 0)).is_ok());
    }
}
