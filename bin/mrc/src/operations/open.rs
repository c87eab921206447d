use super::{Response, check_not_in_progress};
use crate::collab::RequestContext;
use crate::context::MrcContext;
use crate::recovery::recover_xlocset;
use mrc_common::{
    Error, GlobalFileId, ReplicationFlags, Result, SnapConfig, XLoc, XLocList, XLocSet,
    access_mode,
};
use mrc_meta_store::{FileMetadata, StorageManager};
use mrc_xcap::{CapabilityParams, FileCredentials, now_millis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenArgs {
    pub volume: String,
    pub path: String,
    /// POSIX open flags, see [`access_mode`]
    #[serde(default)]
    pub flags: u32,
}

/// Open (and optionally create) a file and issue credentials for it.
///
/// Fails with `RetryLater` while a replica change of the file is running. A
/// crashed replica change of the file is repaired first. Files without
/// replicas get replicas from the volume defaults when they are created or
/// opened for writing.
pub(super) fn handle(ctx: &MrcContext, rq: &RequestContext, args: OpenArgs) -> Result<Response> {
    ctx.check_master()?;
    let mut sm = ctx.volume_by_name(&args.volume)?;
    let flags = args.flags;
    let create = flags & access_mode::O_CREAT != 0;
    let write = access_mode::is_write(flags);
    let now = now_millis();

    let mut update = sm.create_atomic_update();
    let file = match sm.resolve_path(&args.path)? {
        Some(_) if create && flags & access_mode::O_EXCL != 0 => {
            return Err(Error::precondition_failed(format!(
                "{}:{} already exists",
                args.volume, args.path
            )));
        }
        Some(file) => file,
        None if create => sm.create_file(&args.path, &rq.user_id, now, &mut update),
        None => {
            return Err(Error::not_found(format!("{}:{}", args.volume, args.path)));
        }
    };
    if file.is_directory {
        return Err(Error::invalid_argument(format!("{} is a directory", args.path)));
    }
    if file.is_symlink() {
        return Err(Error::invalid_argument(format!("{} is a symlink", args.path)));
    }
    if file.read_only && write {
        return Err(Error::permission_denied(format!("{} is read-only", args.path)));
    }

    let file_id = file.global_id(sm.volume_id());
    let lock = ctx.coordinator.lock_of(&file_id, &file);
    check_not_in_progress(&file_id, &lock)?;
    let mut file = recover_xlocset(&sm, file, &lock, &mut update);

    let mut epoch = file.epoch;
    if flags & access_mode::O_TRUNC != 0 {
        epoch = file.issued_epoch + 1;
        file = file.with_issued_epoch(epoch);
        sm.set_metadata(file.clone(), &mut update);
    }

    if file.xloc_list.is_empty() && (create || write) {
        let xloc_list = initial_replicas(ctx, &sm, &file_id, &file)?;
        debug!(
            "Assigned {} replica(s) to {} on {:?}",
            xloc_list.len(),
            file_id,
            xloc_list.head_osds()
        );
        file = file.with_xloc_list(xloc_list);
        sm.set_metadata(file.clone(), &mut update);
    }

    let voucher_size = if write {
        ctx.vouchers.issue_voucher(sm.volume(), &file, rq)?
    } else {
        0
    };
    ctx.commit(update)?;

    let xcap = ctx.issue_capability(CapabilityParams {
        file_id: file_id.to_string(),
        access_mode: flags,
        validity_s: ctx.config.capability.timeout_s,
        client_identity: rq.client_address.clone(),
        epoch,
        replicate_on_close: file.xloc_list.update_policy.is_read_only(),
        snap_config: if sm.volume().snapshots_enabled {
            SnapConfig::AccessCurrent
        } else {
            SnapConfig::SnapsDisabled
        },
        snap_timestamp: 0,
        voucher_size,
    });
    let read_only_size = if file.read_only { file.size } else { 0 };
    Ok(Response::Credentials(FileCredentials {
        xcap,
        xlocs: XLocSet::from_list(&file.xloc_list, read_only_size),
    }))
}

/// First replica list of a file, following the volume defaults
fn initial_replicas(
    ctx: &MrcContext,
    sm: &StorageManager,
    file_id: &GlobalFileId,
    file: &FileMetadata,
) -> Result<XLocList> {
    let volume = sm.volume();
    let policy = volume.default_replication_policy;
    let update_policy = policy.update_policy;
    let (count, flags) = if update_policy.is_none() {
        (1, policy.flags)
    } else if update_policy.is_read_only() {
        (
            1,
            policy
                .flags
                .union(ReplicationFlags::FULL_REPLICA | ReplicationFlags::IS_COMPLETE),
        )
    } else {
        (policy.factor.max(1), policy.flags)
    };

    let mut exclude = HashSet::new();
    let mut replicas: Vec<XLoc> = Vec::new();
    for i in 0..count {
        let replica = ctx.osds.create_replica(
            volume.default_striping_policy,
            flags,
            &format!("{file_id}/{i}"),
            &exclude,
        )?;
        exclude.extend(replica.osd_uuids.iter().cloned());
        replicas.push(replica);
    }
    sm.create_xloc_list(replicas, update_policy, file.xloc_list.version + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{AddReplicaArgs, FileRef, NewReplica, Request, dispatch};
    use crate::testing::{Harness, alice, list};
    use mrc_common::{OsdUuid, ReplicationPolicy, UpdatePolicy};
    use mrc_meta_store::XLocSetLockState;

    fn open(path: &str, flags: u32) -> Request {
        Request::Open(OpenArgs {
            volume: "scratch".into(),
            path: path.into(),
            flags,
        })
    }

    fn credentials(resp: Response) -> FileCredentials {
        match resp {
            Response::Credentials(creds) => creds,
            other => panic!("expected credentials, got {other:?}"),
        }
    }

    #[test]
    fn test_create_assigns_default_replicas() {
        let harness = Harness::with_volume(|v| {
            v.default_replication_policy = ReplicationPolicy {
                update_policy: UpdatePolicy::WqRq,
                factor: 3,
                flags: ReplicationFlags::empty(),
            };
        });
        let (ctx, _queue) = harness.context(1);

        let creds = credentials(
            dispatch(&ctx, &alice(), open("/new", access_mode::O_CREAT | access_mode::O_RDWR)).unwrap(),
        );
        assert_eq!(creds.xlocs.version, 1);
        assert_eq!(creds.xlocs.update_policy, UpdatePolicy::WqRq);
        assert_eq!(creds.xlocs.replicas.len(), 3);
        assert_eq!(creds.xcap.client_identity, "10.0.0.7");
        assert!(!creds.xcap.replicate_on_close);

        let file = harness.volume().resolve_path("/new").unwrap().unwrap();
        assert_eq!(file.owner, "alice");
        assert_eq!(file.xloc_list.len(), 3);
        assert_eq!(creds.xcap.file_id, format!("v-1:{}", file.id));
    }

    #[test]
    fn test_read_only_default_replicates_on_close() {
        let harness = Harness::with_volume(|v| {
            v.default_replication_policy = ReplicationPolicy {
                update_policy: UpdatePolicy::ReadOnly,
                factor: 3,
                flags: ReplicationFlags::empty(),
            };
        });
        let (ctx, _queue) = harness.context(1);

        let creds = credentials(
            dispatch(&ctx, &alice(), open("/new", access_mode::O_CREAT | access_mode::O_WRONLY)).unwrap(),
        );
        assert_eq!(creds.xlocs.replicas.len(), 1);
        assert!(creds.xlocs.replicas[0].replication_flags.is_full());
        assert!(creds.xcap.replicate_on_close);
    }

    #[test]
    fn test_exclusive_create_of_existing_file() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A"], 1));
        let (ctx, _queue) = harness.context(1);

        let err = dispatch(
            &ctx,
            &alice(),
            open("/f", access_mode::O_CREAT | access_mode::O_EXCL | access_mode::O_RDWR),
        )
        .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[test]
    fn test_missing_file_and_directory() {
        let harness = Harness::new();
        let (ctx, _queue) = harness.context(1);

        let err = dispatch(&ctx, &alice(), open("/nope", access_mode::O_RDONLY)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = dispatch(&ctx, &alice(), open("/", access_mode::O_RDONLY)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_read_only_file_cannot_be_written() {
        let harness = Harness::new();
        let file = harness.replicated_file(list(&["A"], 1));
        harness.put_file(file.with_read_only(true).with_size(42));
        let (ctx, _queue) = harness.context(1);

        let err = dispatch(&ctx, &alice(), open("/f", access_mode::O_WRONLY)).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let creds = credentials(dispatch(&ctx, &alice(), open("/f", access_mode::O_RDONLY)).unwrap());
        assert_eq!(creds.xlocs.read_only_file_size, 42);
    }

    #[test]
    fn test_truncate_issues_new_epoch() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A"], 1));
        let (ctx, _queue) = harness.context(1);

        let creds = credentials(
            dispatch(&ctx, &alice(), open("/f", access_mode::O_RDWR | access_mode::O_TRUNC)).unwrap(),
        );
        assert_eq!(creds.xcap.epoch, 1);
        assert_eq!(harness.file(100).issued_epoch, 1);
    }

    #[test]
    fn test_open_recovers_crashed_change() {
        let harness = Harness::new();
        let file = harness.replicated_file(list(&["A", "B"], 4));
        harness.put_file(file.with_lock(XLocSetLockState::Locked {
            target_version: 5,
            owner_generation: 0,
            owner: "mrc-old".into(),
        }));
        let (ctx, _queue) = harness.context(1);

        let creds = credentials(dispatch(&ctx, &alice(), open("/f", access_mode::O_RDONLY)).unwrap());
        assert_eq!(creds.xlocs.version, 5);
        assert_eq!(creds.xlocs.replicas, list(&["A", "B"], 4).replicas);

        let stored = harness.file(100);
        assert_eq!(stored.xloc_list.version, 5);
        assert!(!stored.xlocset_lock.is_locked());

        // A second open finds nothing left to recover.
        dispatch(&ctx, &alice(), open("/f", access_mode::O_RDONLY)).unwrap();
        assert_eq!(harness.file(100).xloc_list.version, 5);
    }

    #[test]
    fn test_open_during_change_is_retried() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        let (ctx, _queue) = harness.context(1);
        dispatch(
            &ctx,
            &alice(),
            Request::AddReplica(AddReplicaArgs {
                file: FileRef::by_path("scratch", "/f"),
                replica: NewReplica {
                    osd_uuids: vec![OsdUuid::from("C")],
                    ..NewReplica::default()
                },
            }),
        )
        .unwrap();
        let before = harness.file(100);

        let err = dispatch(&ctx, &alice(), open("/f", access_mode::O_RDWR)).unwrap_err();
        assert!(matches!(err, Error::RetryLater(_)));
        let err = dispatch(&ctx, &alice(), open("/f", access_mode::O_RDONLY)).unwrap_err();
        assert!(matches!(err, Error::RetryLater(_)));
        assert_eq!(harness.file(100), before);
    }
}
