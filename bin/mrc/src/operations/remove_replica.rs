use super::{FileRef, Response, check_not_in_progress, check_replicable};
use crate::collab::RequestContext;
use crate::context::MrcContext;
use mrc_common::{Error, OsdUuid, Result, SnapConfig, XLocSet, access_mode};
use mrc_meta_store::XLocSetLockState;
use mrc_xcap::{CapabilityParams, FileCredentials};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveReplicaArgs {
    #[serde(flatten)]
    pub file: FileRef,
    /// Head OSD of the replica to remove
    pub osd_uuid: OsdUuid,
}

/// Remove a replica and return the credentials to delete its data.
///
/// The removal is committed directly; the returned capability and the
/// pre-removal replica list let the caller delete the objects on the removed
/// replica's OSDs.
pub(super) fn handle(ctx: &MrcContext, rq: &RequestContext, args: RemoveReplicaArgs) -> Result<Response> {
    ctx.check_master()?;
    let (sm, file) = ctx.resolve(&args.file)?;
    check_replicable(&file)?;

    let file_id = file.global_id(sm.volume_id());
    check_not_in_progress(&file_id, &ctx.coordinator.lock_of(&file_id, &file))?;
    ctx.permissions.check_privileged(sm.volume(), &file, rq)?;

    let current = file.xloc_list.clone();
    let policy = current.update_policy;
    if policy.is_none() {
        return Err(Error::precondition_failed(format!("{file_id} is not replicated")));
    }
    let index = current.replica_index_by_head(&args.osd_uuid).ok_or_else(|| {
        Error::precondition_failed(format!(
            "OSD {} is not the head OSD of any replica of {file_id}",
            args.osd_uuid
        ))
    })?;
    if current.len() == 1 {
        return Err(Error::precondition_failed(format!(
            "cannot remove the last replica of {file_id}"
        )));
    }

    let mut replicas = current.replicas.clone();
    replicas.remove(index);
    if policy.is_read_only()
        && !replicas
            .iter()
            .any(|r| r.replication_flags.is_full() || r.replication_flags.is_complete())
    {
        return Err(Error::precondition_failed(format!(
            "removing {} would leave {file_id} without a full or complete replica",
            args.osd_uuid
        )));
    }
    let target = sm.create_xloc_list(replicas, policy, current.version + 1)?;

    ctx.vouchers.remove_replica(sm.volume(), &file)?;

    // A single remaining replica is writable again.
    let read_only = target.len() > 1 && file.read_only;
    let epoch = file.epoch;
    let updated = file
        .with_xloc_list(target)
        .with_read_only(read_only)
        .with_lock(XLocSetLockState::Unlocked);
    let mut update = sm.create_atomic_update();
    sm.set_metadata(updated.clone(), &mut update);
    ctx.commit(update)?;
    info!(
        "Removed replica {} from {} (version {})",
        args.osd_uuid, file_id, updated.xloc_list.version
    );

    let validity_s = ctx.config.capability.timeout_s + ctx.config.coordinator.lease_timeout_ms / 1000;
    let xcap = ctx.issue_capability(CapabilityParams {
        file_id: file_id.to_string(),
        access_mode: access_mode::NON_POSIX_DELETE,
        validity_s,
        client_identity: rq.client_address.clone(),
        epoch,
        replicate_on_close: false,
        snap_config: SnapConfig::SnapsDisabled,
        snap_timestamp: 0,
        voucher_size: 0,
    });
    Ok(Response::Credentials(FileCredentials {
        xcap,
        xlocs: XLocSet::from_list(&current, 0),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{Request, dispatch};
    use crate::testing::{Harness, alice, list, replica};
    use mrc_common::{GlobalFileId, ReplicationFlags, UpdatePolicy, XLocList};

    fn remove(osd: &str) -> Request {
        Request::RemoveReplica(RemoveReplicaArgs {
            file: FileRef::by_path("scratch", "/f"),
            osd_uuid: OsdUuid::from(osd),
        })
    }

    #[test]
    fn test_remove_commits_new_list_and_returns_delete_credentials() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B", "C"], 4));
        let (ctx, _queue) = harness.context(1);

        let resp = dispatch(&ctx, &alice(), remove("B")).unwrap();
        let Response::Credentials(creds) = resp else {
            panic!("expected credentials, got {resp:?}");
        };
        assert_eq!(creds.xcap.access_mode, access_mode::NON_POSIX_DELETE);
        assert_eq!(creds.xcap.file_id, GlobalFileId::new("v-1", 100).to_string());
        assert_eq!(creds.xlocs.version, 4);
        assert_eq!(creds.xlocs.replicas.len(), 3);
        assert!(creds.xcap.verify_signature(&harness.config.capability.secret).is_ok());

        let file = harness.file(100);
        assert_eq!(file.xloc_list, list(&["A", "C"], 5));
        assert!(!file.xlocset_lock.is_locked());
    }

    #[test]
    fn test_only_head_osds_identify_replicas() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 2));
        let (ctx, _queue) = harness.context(1);

        let err = dispatch(&ctx, &alice(), remove("C")).unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
        assert_eq!(harness.file(100).xloc_list.version, 2);
    }

    #[test]
    fn test_last_replica_is_kept() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A"], 1));
        let (ctx, _queue) = harness.context(1);

        let err = dispatch(&ctx, &alice(), remove("A")).unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[test]
    fn test_read_only_keeps_a_complete_replica() {
        let harness = Harness::new();
        let mut full = replica("A");
        full.replication_flags = ReplicationFlags::FULL_REPLICA | ReplicationFlags::IS_COMPLETE;
        let ronly = XLocList::new(vec![full, replica("B")], UpdatePolicy::ReadOnly, 3).unwrap();
        let file = harness.replicated_file(ronly);
        harness.put_file(file.with_read_only(true));
        let (ctx, _queue) = harness.context(1);

        let err = dispatch(&ctx, &alice(), remove("A")).unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));

        dispatch(&ctx, &alice(), remove("B")).unwrap();
        let file = harness.file(100);
        assert_eq!(file.xloc_list.len(), 1);
        assert!(!file.read_only);
    }

    #[test]
    fn test_blocked_while_change_in_progress() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        let (ctx, _queue) = harness.context(1);

        dispatch(
            &ctx,
            &alice(),
            Request::AddReplica(crate::operations::AddReplicaArgs {
                file: FileRef::by_path("scratch", "/f"),
                replica: crate::operations::NewReplica {
                    osd_uuids: vec![OsdUuid::from("C")],
                    ..Default::default()
                },
            }),
        )
        .unwrap();
        let err = dispatch(&ctx, &alice(), remove("B")).unwrap_err();
        assert!(matches!(err, Error::RetryLater(_)));
    }
}
