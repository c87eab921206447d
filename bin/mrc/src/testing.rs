//! Test fixtures: a scripted OSD client and a store with registered OSDs

use crate::collab::{NoVouchers, OwnerOrSuperuser, RequestContext};
use crate::context::MrcContext;
use crate::coordinator::{CoordinatorQueue, XLocSetCoordinator};
use crate::osd_client::{InvalidateResponse, OsdClient, ReplicaStatus};
use crate::server::MrcServer;
use async_trait::async_trait;
use mrc_common::{
    Error, MrcConfig, OsdUuid, ReplicationFlags, Result, StripingPolicy, UpdatePolicy, XLoc,
    XLocList,
};
use mrc_meta_store::{AtomicMetadataUpdate, FileMetadata, MetaStore, StorageManager, VolumeInfo};
use mrc_placement::{OsdInfo, OsdRegistry};
use mrc_xcap::FileCredentials;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const VOLUME_ID: &str = "v-1";
pub const VOLUME: &str = "scratch";

pub fn replica(osd: &str) -> XLoc {
    XLoc::new(
        StripingPolicy::default(),
        vec![OsdUuid::from(osd)],
        ReplicationFlags::empty(),
    )
}

/// WqRq list of single-OSD replicas
pub fn list(osds: &[&str], version: u64) -> XLocList {
    XLocList::new(
        osds.iter().map(|o| replica(o)).collect(),
        UpdatePolicy::WqRq,
        version,
    )
    .unwrap()
}

pub fn alice() -> RequestContext {
    RequestContext {
        user_id: "alice".into(),
        client_address: "10.0.0.7".into(),
        ..RequestContext::default()
    }
}

enum Reply {
    Ack(InvalidateResponse),
    Fail,
}

/// OSD client whose answers are scripted per OSD; unscripted OSDs
/// acknowledge as non-primary with an empty replica.
#[derive(Default)]
pub struct ScriptedOsdClient {
    replies: Mutex<HashMap<OsdUuid, Reply>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub invalidated: Mutex<Vec<OsdUuid>>,
    pub fetched: Mutex<Vec<OsdUuid>>,
}

impl ScriptedOsdClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ack(&self, osd: &str, is_primary: bool, max_object_version: u64) {
        self.replies.lock().insert(
            OsdUuid::from(osd),
            Reply::Ack(InvalidateResponse {
                is_primary,
                status: Some(ReplicaStatus {
                    truncate_epoch: 0,
                    max_object_version,
                }),
            }),
        );
    }

    pub fn fail(&self, osd: &str) {
        self.replies.lock().insert(OsdUuid::from(osd), Reply::Fail);
    }

    /// Block invalidations until [`release`](Self::release) is called.
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }
}

#[async_trait]
impl OsdClient for ScriptedOsdClient {
    async fn invalidate(&self, osd: &OsdUuid, _creds: &FileCredentials) -> Result<InvalidateResponse> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // Closing the gate wakes every waiter with an error.
            let _ = gate.acquire().await;
        }
        self.invalidated.lock().push(osd.clone());
        match self.replies.lock().get(osd) {
            Some(Reply::Ack(resp)) => Ok(*resp),
            Some(Reply::Fail) => Err(Error::ServiceUnavailable(format!("OSD {osd} is down"))),
            None => Ok(InvalidateResponse {
                is_primary: false,
                status: Some(ReplicaStatus {
                    truncate_epoch: 0,
                    max_object_version: 0,
                }),
            }),
        }
    }

    async fn fetch_invalidated(&self, osd: &OsdUuid, _creds: &FileCredentials) -> Result<()> {
        self.fetched.lock().push(osd.clone());
        Ok(())
    }
}

/// Temporary store with volume `scratch` and OSDs A to E in separate racks
pub struct Harness {
    _dir: TempDir,
    pub store: Arc<MetaStore>,
    pub osds: Arc<OsdRegistry>,
    pub config: MrcConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_volume(|_| {})
    }

    pub fn with_volume(configure: impl FnOnce(&mut VolumeInfo)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(dir.path().join("mrc.redb")).unwrap());
        let mut volume = VolumeInfo::new(VOLUME_ID, VOLUME, "root", 0);
        configure(&mut volume);
        store.create_volume(&volume).unwrap();

        let osds = Arc::new(OsdRegistry::new());
        for (i, osd) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            osds.upsert(OsdInfo::new(
                *osd,
                format!("http://osd-{osd}:32640"),
                format!("rack-{i}"),
            ));
        }

        let mut config = MrcConfig::default();
        config.server.uuid = "mrc-test".into();
        config.coordinator.invalidate_timeout_ms = 2_000;
        config.coordinator.lease_timeout_ms = 20;
        Self {
            _dir: dir,
            store,
            osds,
            config,
        }
    }

    pub fn volume(&self) -> StorageManager {
        StorageManager::open(self.store.clone(), VOLUME_ID)
            .unwrap()
            .unwrap()
    }

    /// Store `file` under its path
    pub fn put_file(&self, file: FileMetadata) -> FileMetadata {
        let mut update: AtomicMetadataUpdate = AtomicMetadataUpdate::new(self.store.clone());
        update.put_path(VOLUME_ID, &file.path, file.id);
        update.put_file(VOLUME_ID, file.clone());
        update.commit().unwrap();
        file
    }

    /// Regular file `/f` (ID 100) owned by alice with the given replicas
    pub fn replicated_file(&self, xloc_list: XLocList) -> FileMetadata {
        self.put_file(FileMetadata::new_file(100, "/f", "alice", 0).with_xloc_list(xloc_list))
    }

    pub fn file(&self, id: u64) -> FileMetadata {
        self.store.get_file(VOLUME_ID, id).unwrap().unwrap()
    }

    /// Context without running tasks; the queue must outlive the test.
    pub fn context(&self, generation: u64) -> (MrcContext, CoordinatorQueue) {
        let (coordinator, queue) = XLocSetCoordinator::new(&self.config, generation);
        let context = MrcContext {
            config: self.config.clone(),
            store: self.store.clone(),
            osds: self.osds.clone(),
            coordinator,
            permissions: Arc::new(OwnerOrSuperuser),
            vouchers: Arc::new(NoVouchers),
        };
        (context, queue)
    }

    pub fn start(&self, client: Arc<ScriptedOsdClient>) -> MrcServer {
        MrcServer::start(
            self.config.clone(),
            self.store.clone(),
            self.osds.clone(),
            client,
            Arc::new(OwnerOrSuperuser),
            Arc::new(NoVouchers),
        )
        .unwrap()
    }
}

/// Wait until the coordinator has no change in flight.
pub async fn settle(server: &MrcServer) {
    for _ in 0..500 {
        if server.context().coordinator.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("coordinator did not settle");
}
