//! Server assembly
//!
//! Wires the metadata store, the OSD registry, the processing stage and the
//! XLocSet coordinator together and spawns the long-running tasks.

use crate::collab::{PermissionChecker, VoucherManager};
use crate::context::MrcContext;
use crate::coordinator::{CoordinatorWorker, XLocSetCoordinator};
use crate::osd_client::OsdClient;
use crate::stage::{ProcessingStage, StageHandle};
use mrc_common::config::{OsdConfig, VolumeConfig};
use mrc_common::{Error, MrcConfig, OsdUuid, Result};
use mrc_meta_store::{MetaStore, VolumeInfo};
use mrc_placement::{OsdInfo, OsdRegistry};
use mrc_xcap::now_millis;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct MrcServer {
    context: Arc<MrcContext>,
    stage: StageHandle,
    stage_task: JoinHandle<()>,
    coordinator_task: JoinHandle<()>,
}

impl MrcServer {
    /// Start a new server generation on `store`.
    ///
    /// Locks taken by earlier generations are treated as crashed from here on.
    pub fn start(
        config: MrcConfig,
        store: Arc<MetaStore>,
        osds: Arc<OsdRegistry>,
        osd_client: Arc<dyn OsdClient>,
        permissions: Arc<dyn PermissionChecker>,
        vouchers: Arc<dyn VoucherManager>,
    ) -> Result<Self> {
        let generation = store.bump_generation()?;
        info!(
            "Starting MRC {} (generation {})",
            config.server.uuid, generation
        );

        let (coordinator, queue) = XLocSetCoordinator::new(&config, generation);
        let server_uuid = config.server.uuid.clone();
        let coordinator_config = config.coordinator.clone();
        let context = Arc::new(MrcContext {
            config,
            store,
            osds,
            coordinator,
            permissions,
            vouchers,
        });

        let (stage, handle) = ProcessingStage::new(context.clone(), coordinator_config.queue_depth);
        let worker = CoordinatorWorker::new(
            queue,
            osd_client,
            handle.clone(),
            server_uuid,
            &coordinator_config,
        );
        let stage_task = tokio::spawn(stage.run());
        let coordinator_task = tokio::spawn(worker.run());

        Ok(Self {
            context,
            stage: handle,
            stage_task,
            coordinator_task,
        })
    }

    #[must_use]
    pub const fn context(&self) -> &Arc<MrcContext> {
        &self.context
    }

    #[must_use]
    pub fn stage(&self) -> StageHandle {
        self.stage.clone()
    }

    /// Stop both tasks. Changes that are still in flight are recovered by
    /// the next generation.
    pub fn shutdown(self) {
        self.coordinator_task.abort();
        self.stage_task.abort();
        info!("MRC stopped");
    }
}

/// Create every configured volume that does not exist yet.
pub fn ensure_volumes(store: &MetaStore, volumes: &[VolumeConfig]) -> Result<()> {
    for config in volumes {
        let policy = config.default_replication_policy.update_policy;
        if policy.is_read_write() && config.default_striping_policy.width > 1 {
            return Err(Error::Configuration(format!(
                "volume '{}': {policy} replication does not support striping width {}",
                config.name, config.default_striping_policy.width
            )));
        }
        if store.volume_by_name(&config.name)?.is_some() {
            continue;
        }
        let mut volume = VolumeInfo::new(
            uuid::Uuid::new_v4().to_string(),
            config.name.clone(),
            config.owner.clone(),
            now_millis(),
        );
        volume.default_striping_policy = config.default_striping_policy;
        volume.default_replication_policy = config.default_replication_policy;
        store.create_volume(&volume)?;
        info!("Created volume '{}' ({})", volume.name, volume.id);
    }
    Ok(())
}

/// Load persisted OSDs into `registry`, then add or update the configured ones.
pub fn register_osds(store: &MetaStore, registry: &OsdRegistry, osds: &[OsdConfig]) -> Result<()> {
    for osd in store.load_osds()? {
        registry.upsert(osd);
    }
    for config in osds {
        if config.uuid.is_empty() || config.address.is_empty() {
            warn!("Skipping OSD entry without uuid or address");
            continue;
        }
        let mut info = OsdInfo::new(
            OsdUuid::new(config.uuid.clone()),
            config.address.clone(),
            config.failure_domain.clone(),
        );
        info.weight = config.weight;
        store.put_osd(&info)?;
        registry.upsert(info);
    }
    info!("Registered {} OSDs", registry.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::RequestContext;
    use crate::operations::{AddReplicaArgs, FileRef, NewReplica, OpenArgs, Request, Response};
    use crate::testing::{Harness, ScriptedOsdClient, alice, list, settle};
    use mrc_common::{ReplicationPolicy, StripingPolicy, UpdatePolicy, access_mode};
    use mrc_meta_store::{FileMetadata, XLocSetLockState};

    fn add(osd: &str) -> Request {
        Request::AddReplica(AddReplicaArgs {
            file: FileRef::by_path("scratch", "/f"),
            replica: NewReplica {
                osd_uuids: vec![OsdUuid::from(osd)],
                ..NewReplica::default()
            },
        })
    }

    fn open_rdonly() -> Request {
        Request::Open(OpenArgs {
            volume: "scratch".into(),
            path: "/f".into(),
            flags: access_mode::O_RDONLY,
        })
    }

    #[tokio::test]
    async fn test_add_replica_end_to_end() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        let client = ScriptedOsdClient::new();
        client.ack("A", true, 9);
        client.ack("B", false, 9);
        let server = harness.start(client.clone());

        let resp = server.stage().call(alice(), add("C")).await.unwrap();
        assert_eq!(resp, Response::Empty);
        settle(&server).await;

        let file = harness.file(100);
        assert_eq!(file.xloc_list, list(&["A", "B", "C"], 4));
        assert!(!file.xlocset_lock.is_locked());
        let mut invalidated = client.invalidated.lock().clone();
        invalidated.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(invalidated, vec![OsdUuid::from("A"), OsdUuid::from("B")]);
        assert!(client.fetched.lock().is_empty());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_stale_replica_triggers_fetch() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        let client = ScriptedOsdClient::new();
        client.ack("A", true, 9);
        client.ack("B", false, 8);
        let server = harness.start(client.clone());

        server.stage().call(alice(), add("C")).await.unwrap();
        settle(&server).await;

        assert_eq!(*client.fetched.lock(), vec![OsdUuid::from("C")]);
        assert_eq!(harness.file(100).xloc_list.version, 4);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_add_is_refused_until_install() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        let client = ScriptedOsdClient::new();
        client.hold();
        let server = harness.start(client.clone());

        server.stage().call(alice(), add("C")).await.unwrap();
        let err = server.stage().call(alice(), add("D")).await.unwrap_err();
        assert!(matches!(err, Error::RetryLater(_)));
        let err = server.stage().call(alice(), open_rdonly()).await.unwrap_err();
        assert!(matches!(err, Error::RetryLater(_)));

        client.release();
        settle(&server).await;
        let file = harness.file(100);
        assert_eq!(file.xloc_list, list(&["A", "B", "C"], 4));

        server.stage().call(alice(), add("D")).await.unwrap();
        settle(&server).await;
        assert_eq!(harness.file(100).xloc_list, list(&["A", "B", "C", "D"], 5));
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unreachable_replicas_leave_change_to_recovery() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        let client = ScriptedOsdClient::new();
        client.fail("A");
        client.fail("B");
        let server = harness.start(client.clone());

        server.stage().call(alice(), add("C")).await.unwrap();
        settle(&server).await;
        let file = harness.file(100);
        assert_eq!(file.xloc_list.version, 3);
        assert!(file.xlocset_lock.is_locked());

        let resp = server.stage().call(alice(), open_rdonly()).await.unwrap();
        let Response::Credentials(creds) = resp else {
            panic!("expected credentials, got {resp:?}");
        };
        assert_eq!(creds.xlocs.version, 4);
        assert_eq!(creds.xlocs.replicas, list(&["A", "B"], 3).replicas);
        assert!(!harness.file(100).xlocset_lock.is_locked());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_lock_of_previous_generation_recovered_on_open() {
        let harness = Harness::new();
        let file = harness.put_file(
            FileMetadata::new_file(100, "/f", "alice", 0)
                .with_xloc_list(list(&["A", "B"], 4))
                .with_lock(XLocSetLockState::Locked {
                    target_version: 5,
                    owner_generation: 0,
                    owner: "mrc-test".into(),
                }),
        );
        let server = harness.start(ScriptedOsdClient::new());
        assert!(server.context().coordinator.generation() > 0);

        let resp = server.stage().call(alice(), open_rdonly()).await.unwrap();
        let Response::Credentials(creds) = resp else {
            panic!("expected credentials, got {resp:?}");
        };
        assert_eq!(creds.xlocs.version, 5);
        assert_eq!(creds.xlocs.replicas, file.xloc_list.replicas);
        let stored = harness.file(100);
        assert_eq!(stored.xloc_list.version, 5);
        assert_eq!(stored.xlocset_lock, XLocSetLockState::Unlocked);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_internal_requests_bypass_privilege_checks() {
        let harness = Harness::new();
        harness.replicated_file(list(&["A", "B"], 3));
        let server = harness.start(ScriptedOsdClient::new());

        let ctx = RequestContext::internal("mrc-test");
        server.stage().call(ctx, add("C")).await.unwrap();
        settle(&server).await;
        assert_eq!(harness.file(100).xloc_list.version, 4);
        server.shutdown();
    }

    #[test]
    fn test_ensure_volumes() {
        let harness = Harness::new();
        let volumes = vec![
            VolumeConfig {
                name: "scratch".into(),
                ..VolumeConfig::default()
            },
            VolumeConfig {
                name: "data".into(),
                owner: "alice".into(),
                default_striping_policy: StripingPolicy::default(),
                default_replication_policy: ReplicationPolicy {
                    update_policy: UpdatePolicy::WaR1,
                    factor: 2,
                    ..ReplicationPolicy::default()
                },
            },
        ];
        ensure_volumes(&harness.store, &volumes).unwrap();
        ensure_volumes(&harness.store, &volumes).unwrap();

        let volumes_after = harness.store.load_volumes().unwrap();
        assert_eq!(volumes_after.len(), 2);
        let data = harness.store.volume_by_name("data").unwrap().unwrap();
        assert_eq!(data.owner, "alice");
        assert_eq!(data.default_replication_policy.factor, 2);
    }

    #[test]
    fn test_striped_quorum_volume_rejected() {
        let harness = Harness::new();
        let striped = VolumeConfig {
            name: "striped".into(),
            default_striping_policy: StripingPolicy::raid0(128, 4),
            default_replication_policy: ReplicationPolicy {
                update_policy: UpdatePolicy::WqRq,
                factor: 3,
                ..ReplicationPolicy::default()
            },
            ..VolumeConfig::default()
        };
        let err = ensure_volumes(&harness.store, &[striped]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_register_osds_persists_configured_nodes() {
        let harness = Harness::new();
        let osds = vec![
            OsdConfig {
                uuid: "osd-9".into(),
                address: "http://10.0.0.9:32640".into(),
                ..OsdConfig::default()
            },
            OsdConfig::default(),
        ];
        let registry = OsdRegistry::new();
        register_osds(&harness.store, &registry, &osds).unwrap();
        assert_eq!(registry.len(), 1);

        let reloaded = OsdRegistry::new();
        register_osds(&harness.store, &reloaded, &[]).unwrap();
        assert_eq!(
            reloaded.address_of(&OsdUuid::from("osd-9")).as_deref(),
            Some("http://10.0.0.9:32640")
        );
    }
}
