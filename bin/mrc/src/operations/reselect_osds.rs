use super::{Response, check_not_in_progress, check_replicable};
use crate::collab::RequestContext;
use crate::context::MrcContext;
use crate::coordinator::XLocSetChangeKind;
use mrc_common::{Error, OsdUuid, ReplicationFlags, Result};
use mrc_xcap::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReselectOsdsArgs {
    pub volume: String,
    pub path: String,
    /// Client location hint; changes which OSDs rank highest
    #[serde(default)]
    pub coordinates: Option<String>,
}

/// Re-run OSD selection for every replica and move the file to the result.
pub(super) fn handle(ctx: &MrcContext, rq: &RequestContext, args: ReselectOsdsArgs) -> Result<Response> {
    ctx.check_master()?;
    let sm = ctx.volume_by_name(&args.volume)?;
    let file = sm
        .resolve_path(&args.path)?
        .ok_or_else(|| Error::not_found(format!("{}:{}", args.volume, args.path)))?;
    check_replicable(&file)?;

    let file_id = file.global_id(sm.volume_id());
    let current = &file.xloc_list;
    let policy = current.update_policy;
    if !policy.is_read_write() {
        return Err(Error::invalid_argument(format!(
            "OSD reselection is only supported for WqRq and WaR1 files, {file_id} uses '{policy}'"
        )));
    }
    check_not_in_progress(&file_id, &ctx.coordinator.lock_of(&file_id, &file))?;
    ctx.permissions.check_privileged(sm.volume(), &file, rq)?;

    let seed = match &args.coordinates {
        Some(coordinates) => format!("{file_id}@{coordinates}"),
        None => file_id.to_string(),
    };
    let mut exclude: HashSet<OsdUuid> = HashSet::new();
    let mut replicas = Vec::with_capacity(current.len());
    for (i, replica) in current.replicas.iter().enumerate() {
        let mut selected = ctx.osds.create_replica(
            replica.striping_policy,
            replica.replication_flags,
            &format!("{seed}/{i}"),
            &exclude,
        )?;
        if selected
            .head_osd()
            .is_some_and(|head| !current.contains_osd(head))
        {
            selected.replication_flags = selected
                .replication_flags
                .without(ReplicationFlags::IS_COMPLETE);
        }
        exclude.extend(selected.osd_uuids.iter().cloned());
        replicas.push(selected);
    }
    let target = sm.create_xloc_list(replicas, policy, current.version + 1)?;
    if target.same_membership(current) {
        info!("OSD selection for {} is unchanged", file_id);
        return Ok(Response::Empty);
    }

    let change = ctx.coordinator.request_xlocset_change(
        XLocSetChangeKind::ReselectOsds,
        file_id.clone(),
        &file,
        target,
        now_millis(),
    )?;
    let target_version = change.target.version;
    let mut update = sm.create_atomic_update();
    ctx.coordinator.lock_xlocset(&sm, file, change, &mut update);
    ctx.commit(update)?;
    info!("Reselecting OSDs of {} (version {})", file_id, target_version);
    Ok(Response::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{Request, dispatch};
    use crate::testing::{Harness, alice, list, replica};
    use mrc_common::{UpdatePolicy, XLocList};
    use mrc_placement::OsdStatus;

    fn reselect() -> Request {
        Request::ReselectOsds(ReselectOsdsArgs {
            volume: "scratch".into(),
            path: "/f".into(),
            coordinates: None,
        })
    }

    #[test]
    fn test_moves_off_unusable_osd() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        harness.osds.set_status(&OsdUuid::from("A"), OsdStatus::Draining).unwrap();
        let (ctx, mut queue) = harness.context(1);

        dispatch(&ctx, &alice(), reselect()).unwrap();
        let change = queue.try_next().unwrap();
        assert_eq!(change.kind, XLocSetChangeKind::ReselectOsds);
        assert_eq!(change.target.version, 4);
        assert_eq!(change.target.len(), 2);
        assert!(!change.target.contains_osd(&OsdUuid::from("A")));
        assert!(harness.file(100).xlocset_lock.is_locked());
    }

    #[test]
    fn test_unchanged_selection_is_a_no_op() {
        let harness = Harness::new();
        let (ctx, mut queue) = harness.context(1);
        // Whatever the selector picks for this file is already installed.
        let sm = harness.volume();
        let file_id = mrc_common::GlobalFileId::new("v-1", 100);
        let mut exclude = HashSet::new();
        let mut picked = Vec::new();
        for i in 0..2 {
            let r = harness
                .osds
                .create_replica(
                    mrc_common::StripingPolicy::default(),
                    ReplicationFlags::empty(),
                    &format!("{file_id}/{i}"),
                    &exclude,
                )
                .unwrap();
            exclude.extend(r.osd_uuids.iter().cloned());
            picked.push(r);
        }
        let current = sm.create_xloc_list(picked, UpdatePolicy::WqRq, 3).unwrap();
        harness.replicated_file(current);

        assert_eq!(dispatch(&ctx, &alice(), reselect()).unwrap(), Response::Empty);
        assert!(queue.try_next().is_none());
        assert!(!harness.file(100).xlocset_lock.is_locked());
    }

    #[test]
    fn test_read_only_files_rejected() {
        let harness = Harness::new();
        let ronly = XLocList::new(vec![replica("A")], UpdatePolicy::ReadOnly, 1).unwrap();
        harness.replicated_file(ronly);
        let (ctx, _queue) = harness.context(1);

        let err = dispatch(&ctx, &alice(), reselect()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_missing_file() {
        let harness = Harness::new();
        let (ctx, _queue) = harness.context(1);
        let err = dispatch(&ctx, &alice(), reselect()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
