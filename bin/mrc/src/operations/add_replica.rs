use super::{FileRef, Response, check_not_in_progress, check_replicable};
use crate::collab::RequestContext;
use crate::context::MrcContext;
use crate::coordinator::XLocSetChangeKind;
use mrc_common::{Error, OsdUuid, ReplicationFlags, Result, StripingPolicy, XLoc};
use mrc_xcap::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

/// Replica to add; without OSDs, the OSDs are picked from the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReplica {
    #[serde(default)]
    pub striping_policy: StripingPolicy,
    #[serde(default)]
    pub osd_uuids: Vec<OsdUuid>,
    #[serde(default)]
    pub replication_flags: ReplicationFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReplicaArgs {
    #[serde(flatten)]
    pub file: FileRef,
    pub replica: NewReplica,
}

pub(super) fn handle(ctx: &MrcContext, rq: &RequestContext, args: AddReplicaArgs) -> Result<Response> {
    ctx.check_master()?;
    let (sm, file) = ctx.resolve(&args.file)?;
    check_replicable(&file)?;

    let file_id = file.global_id(sm.volume_id());
    check_not_in_progress(&file_id, &ctx.coordinator.lock_of(&file_id, &file))?;
    ctx.permissions.check_privileged(sm.volume(), &file, rq)?;

    let current = &file.xloc_list;
    let policy = current.update_policy;
    if policy.is_none() {
        return Err(Error::precondition_failed(format!(
            "{file_id} has no replica update policy; set one before adding replicas"
        )));
    }
    if current.is_empty() {
        return Err(Error::precondition_failed(format!(
            "{file_id} has no replica to copy from"
        )));
    }
    if policy.is_read_only() && !file.read_only {
        return Err(Error::precondition_failed(format!(
            "read-only replication of {file_id} requires the file to be read-only"
        )));
    }
    let NewReplica {
        striping_policy,
        osd_uuids,
        replication_flags,
    } = args.replica;
    if policy.is_read_write() && striping_policy.width > 1 {
        return Err(Error::invalid_argument(format!(
            "{policy} replication does not support striping width {}",
            striping_policy.width
        )));
    }

    let replica = if osd_uuids.is_empty() {
        let exclude: HashSet<OsdUuid> = current.osds().cloned().collect();
        ctx.osds
            .create_replica(striping_policy, replication_flags, &file_id.to_string(), &exclude)?
    } else {
        if let Some(osd) = osd_uuids.iter().find(|osd| current.contains_osd(osd)) {
            return Err(Error::invalid_argument(format!(
                "OSD {osd} already holds a replica of {file_id}"
            )));
        }
        ctx.osds.check_usable(&osd_uuids)?;
        XLoc::new(striping_policy, osd_uuids, replication_flags)
    };
    let head = replica.head_osd().cloned();
    let target_version = current.version + 1;

    let mut replicas = current.replicas.clone();
    replicas.push(replica);
    let target = sm.create_xloc_list(replicas, policy, target_version)?;

    ctx.vouchers.check_add_replica(sm.volume(), &file)?;

    let change = ctx.coordinator.request_xlocset_change(
        XLocSetChangeKind::AddReplica,
        file_id.clone(),
        &file,
        target,
        now_millis(),
    )?;
    let mut update = sm.create_atomic_update();
    ctx.coordinator.lock_xlocset(&sm, file, change, &mut update);
    ctx.commit(update)?;

    if let Some(head) = head {
        info!(
            "Adding replica {} to {} (version {})",
            head, file_id, target_version
        );
    }
    Ok(Response::Empty)
}
