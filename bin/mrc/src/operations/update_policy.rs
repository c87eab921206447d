use super::{Response, check_not_in_progress, check_replicable};
use crate::collab::RequestContext;
use crate::context::MrcContext;
use mrc_common::{Error, GlobalFileId, ReplicationFlags, Result, UpdatePolicy, XLoc};
use mrc_meta_store::XLocSetLockState;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReplicaUpdatePolicyArgs {
    pub file_id: String,
    pub update_policy: String,
}

/// Change the update policy of a file that has at most one replica.
///
/// Returns the previous policy. Switching to read-only replication makes the
/// file read-only and marks its replica as the full, complete source.
pub(super) fn handle(
    ctx: &MrcContext,
    rq: &RequestContext,
    args: SetReplicaUpdatePolicyArgs,
) -> Result<Response> {
    ctx.check_master()?;
    let file_id: GlobalFileId = args.file_id.parse()?;
    let new_policy: UpdatePolicy = args.update_policy.parse()?;
    let sm = ctx.volume(&file_id.volume_id)?;
    let file = sm
        .get_metadata(file_id.file_id)?
        .ok_or_else(|| Error::not_found(format!("file {file_id}")))?;
    check_replicable(&file)?;
    check_not_in_progress(&file_id, &ctx.coordinator.lock_of(&file_id, &file))?;
    ctx.permissions.check_privileged(sm.volume(), &file, rq)?;

    let current = &file.xloc_list;
    let old_policy = current.update_policy;
    if old_policy == new_policy {
        return Ok(Response::UpdatePolicy {
            old_update_policy: old_policy,
        });
    }
    if current.len() > 1 {
        return Err(Error::precondition_failed(format!(
            "the update policy of {file_id} can only be changed while it has at most one replica"
        )));
    }
    if new_policy.is_read_write()
        && current
            .replicas
            .iter()
            .any(|r| r.striping_policy.width > 1)
    {
        return Err(Error::invalid_argument(format!(
            "{new_policy} replication does not support striped files"
        )));
    }

    let replicas: Vec<XLoc> = if new_policy.is_read_only() {
        current
            .replicas
            .iter()
            .cloned()
            .map(|mut r| {
                r.replication_flags = r
                    .replication_flags
                    .union(ReplicationFlags::FULL_REPLICA | ReplicationFlags::IS_COMPLETE);
                r
            })
            .collect()
    } else {
        current.replicas.clone()
    };
    let target = sm.create_xloc_list(replicas, new_policy, current.version + 1)?;
    let read_only = if new_policy.is_read_only() {
        true
    } else if old_policy.is_read_only() {
        false
    } else {
        file.read_only
    };

    let updated = file
        .with_xloc_list(target)
        .with_read_only(read_only)
        .with_lock(XLocSetLockState::Unlocked);
    let mut update = sm.create_atomic_update();
    sm.set_metadata(updated, &mut update);
    ctx.commit(update)?;
    info!(
        "Changed update policy of {} from '{}' to '{}'",
        file_id, old_policy, new_policy
    );
    Ok(Response::UpdatePolicy {
        old_update_policy: old_policy,
    })
}
