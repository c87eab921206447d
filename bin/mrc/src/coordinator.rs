//! Replica-set reconfiguration
//!
//! A change runs in two halves. In the processing stage, the operation
//! handler asks [`XLocSetCoordinator::request_xlocset_change`] for a
//! continuation and stores the lock together with the continuation in one
//! [`AtomicMetadataUpdate`]. Once that update is durable the continuation is
//! handed to the [`CoordinatorWorker`], which invalidates the old replicas
//! without holding up the stage and finally enqueues the internal install
//! request, which sets the new list and unlocks in one update.

use crate::collab::RequestContext;
use crate::lock::XLocSetLock;
use crate::operations::Request;
use crate::osd_client::{InvalidateResponse, OsdClient};
use crate::stage::StageHandle;
use dashmap::DashMap;
use futures::future::join_all;
use mrc_common::config::CoordinatorConfig;
use mrc_common::{
    Error, GlobalFileId, MrcConfig, OsdUuid, Result, SnapConfig, UpdatePolicy, XLocList, XLocSet,
    access_mode,
};
use mrc_meta_store::{AtomicMetadataUpdate, FileMetadata, StorageManager, XLocSetLockState};
use mrc_xcap::{Capability, CapabilityParams, FileCredentials};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Metadata update whose post-commit values are reconfiguration continuations
pub type MrcUpdate = AtomicMetadataUpdate<XLocSetChange>;

/// Operation that started a reconfiguration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XLocSetChangeKind {
    AddReplica,
    ReselectOsds,
}

/// Continuation of an accepted reconfiguration
#[derive(Debug, Clone)]
pub struct XLocSetChange {
    pub kind: XLocSetChangeKind,
    pub file_id: GlobalFileId,
    /// Installed list when the change was accepted
    pub current: XLocList,
    /// List to install, always `current.version + 1`
    pub target: XLocList,
    /// Capability the coordinator presents to the OSDs
    pub capability: Capability,
}

impl XLocSetChange {
    fn credentials(&self, list: &XLocList) -> FileCredentials {
        FileCredentials {
            xcap: self.capability.clone(),
            xlocs: XLocSet::from_list(list, 0),
        }
    }
}

/// Handle used by the processing stage to start and track reconfigurations
pub struct XLocSetCoordinator {
    server_uuid: String,
    generation: u64,
    secret: String,
    capability_timeout_s: u64,
    queue: mpsc::UnboundedSender<XLocSetChange>,
    in_flight: Arc<DashMap<GlobalFileId, u64>>,
}

/// Receiving side of the coordinator, consumed by [`CoordinatorWorker`]
pub struct CoordinatorQueue {
    changes: mpsc::UnboundedReceiver<XLocSetChange>,
    in_flight: Arc<DashMap<GlobalFileId, u64>>,
}

#[cfg(test)]
impl CoordinatorQueue {
    pub(crate) fn try_next(&mut self) -> Option<XLocSetChange> {
        self.changes.try_recv().ok()
    }
}

impl XLocSetCoordinator {
    /// Create the coordinator of the server running in `generation`.
    #[must_use]
    pub fn new(config: &MrcConfig, generation: u64) -> (Self, CoordinatorQueue) {
        let (queue, changes) = mpsc::unbounded_channel();
        let in_flight = Arc::new(DashMap::new());
        let coordinator = Self {
            server_uuid: config.server.uuid.clone(),
            generation,
            secret: config.capability.secret.clone(),
            capability_timeout_s: config.capability.timeout_s,
            queue,
            in_flight: in_flight.clone(),
        };
        (coordinator, CoordinatorQueue { changes, in_flight })
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of accepted changes that have not been installed or abandoned
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Lock state of `file` as seen by this server
    #[must_use]
    pub fn lock_of(&self, file_id: &GlobalFileId, file: &FileMetadata) -> XLocSetLock {
        let in_flight_target = self.in_flight.get(file_id).map(|entry| *entry.value());
        XLocSetLock::derive(file, self.generation, in_flight_target)
    }

    /// Validate a reconfiguration of `file` to `target` and package its continuation.
    ///
    /// Nothing is changed until the caller locks the file with the returned
    /// continuation and commits.
    pub fn request_xlocset_change(
        &self,
        kind: XLocSetChangeKind,
        file_id: GlobalFileId,
        file: &FileMetadata,
        target: XLocList,
        now_ms: u64,
    ) -> Result<XLocSetChange> {
        let current = &file.xloc_list;
        if target.version != current.version + 1 {
            return Err(Error::internal(format!(
                "new replica list of {file_id} has version {}, expected {}",
                target.version,
                current.version + 1
            )));
        }
        if self.lock_of(&file_id, file).is_in_progress() {
            return Err(Error::retry_later(format!(
                "replica list of {file_id} is already being changed"
            )));
        }

        let capability = Capability::issue(
            CapabilityParams {
                file_id: file_id.to_string(),
                access_mode: access_mode::O_RDWR,
                validity_s: self.capability_timeout_s,
                client_identity: self.server_uuid.clone(),
                epoch: file.epoch,
                replicate_on_close: false,
                snap_config: SnapConfig::SnapsDisabled,
                snap_timestamp: 0,
                voucher_size: 0,
            },
            now_ms,
            &self.secret,
        );
        Ok(XLocSetChange {
            kind,
            file_id,
            current: current.clone(),
            target,
            capability,
        })
    }

    /// Stage the lock of `file` and register `change` to be submitted on commit.
    pub fn lock_xlocset(
        &self,
        sm: &StorageManager,
        file: FileMetadata,
        change: XLocSetChange,
        update: &mut MrcUpdate,
    ) -> FileMetadata {
        let locked = file.with_lock(XLocSetLockState::Locked {
            target_version: change.target.version,
            owner_generation: self.generation,
            owner: self.server_uuid.clone(),
        });
        sm.set_metadata(locked.clone(), update);
        update.on_commit(change);
        locked
    }

    /// Stage `file` without its lock
    pub fn unlock_xlocset(
        sm: &StorageManager,
        file: FileMetadata,
        update: &mut MrcUpdate,
    ) -> FileMetadata {
        let unlocked = file.with_lock(XLocSetLockState::Unlocked);
        sm.set_metadata(unlocked.clone(), update);
        unlocked
    }

    /// Hand a committed change to the worker.
    pub fn submit(&self, change: XLocSetChange) {
        let file_id = change.file_id.clone();
        let target = change.target.version;
        self.in_flight.insert(file_id.clone(), target);
        if self.queue.send(change).is_err() {
            self.in_flight.remove(&file_id);
            error!(
                "Coordinator is not running; change of {} to version {} is left for recovery",
                file_id, target
            );
        }
    }

    /// Forget the in-flight change of `file_id` to `target_version`.
    pub fn finish(&self, file_id: &GlobalFileId, target_version: u64) {
        self.in_flight
            .remove_if(file_id, |_, version| *version == target_version);
    }
}

/// Background task that invalidates old replicas and triggers the install
pub struct CoordinatorWorker {
    queue: CoordinatorQueue,
    osd_client: Arc<dyn OsdClient>,
    stage: StageHandle,
    server_uuid: String,
    invalidate_timeout: Duration,
    lease_timeout: Duration,
}

impl CoordinatorWorker {
    #[must_use]
    pub fn new(
        queue: CoordinatorQueue,
        osd_client: Arc<dyn OsdClient>,
        stage: StageHandle,
        server_uuid: impl Into<String>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            queue,
            osd_client,
            stage,
            server_uuid: server_uuid.into(),
            invalidate_timeout: Duration::from_millis(config.invalidate_timeout_ms),
            lease_timeout: Duration::from_millis(config.lease_timeout_ms),
        }
    }

    /// Process changes until every coordinator handle is dropped.
    pub async fn run(mut self) {
        info!("XLocSet coordinator started");
        while let Some(change) = self.queue.changes.recv().await {
            self.process(change).await;
        }
        info!("XLocSet coordinator stopped");
    }

    async fn process(&self, change: XLocSetChange) {
        let file_id = change.file_id.clone();
        let target = change.target.version;
        info!(
            "Changing replicas of {} from version {} to {}",
            file_id, change.current.version, target
        );

        let acknowledged = self.invalidate(&change).await;
        let total = change.current.len();

        if total > 0 && acknowledged.is_empty() && change.current.update_policy.is_read_write() {
            warn!(
                "No replica of {} acknowledged the invalidation; leaving the change to version {} for recovery",
                file_id, target
            );
            self.abandon(&file_id, target);
            return;
        }

        let primary_responded = acknowledged.iter().any(|(_, resp)| resp.is_primary);
        if !primary_responded && acknowledged.len() < total {
            info!(
                "No primary of {} responded; waiting {:?} for its lease to expire",
                file_id, self.lease_timeout
            );
            tokio::time::sleep(self.lease_timeout).await;
        }

        if change.kind == XLocSetChangeKind::AddReplica
            && change.target.update_policy == UpdatePolicy::WqRq
        {
            self.fetch_invalidated(&change, &acknowledged).await;
        }

        let install = Request::InstallXLocSet(Box::new(change));
        if let Err(e) = self
            .stage
            .enqueue(RequestContext::internal(&self.server_uuid), install)
            .await
        {
            error!("Failed to enqueue install for {}: {}", file_id, e);
            self.abandon(&file_id, target);
        }
    }

    /// Invalidate the head OSD of every current replica, each attempt bounded.
    async fn invalidate(&self, change: &XLocSetChange) -> Vec<(OsdUuid, InvalidateResponse)> {
        let creds = change.credentials(&change.current);
        let calls = change.current.head_osds().into_iter().map(|osd| {
            let creds = &creds;
            async move {
                let result = bounded(self.invalidate_timeout, self.osd_client.invalidate(osd, creds)).await;
                (osd.clone(), result)
            }
        });

        let mut acknowledged = Vec::new();
        for (osd, result) in join_all(calls).await {
            match result {
                Ok(resp) => {
                    debug!("OSD {} invalidated {} (primary: {})", osd, change.file_id, resp.is_primary);
                    acknowledged.push((osd, resp));
                }
                Err(e) => warn!("OSD {} failed to invalidate {}: {}", osd, change.file_id, e),
            }
        }
        acknowledged
    }

    async fn fetch_invalidated(
        &self,
        change: &XLocSetChange,
        acknowledged: &[(OsdUuid, InvalidateResponse)],
    ) {
        let fetchers = replicas_to_fetch(change, acknowledged);
        if fetchers.is_empty() {
            return;
        }
        let creds = change.credentials(&change.target);
        for osd in fetchers {
            match bounded(self.invalidate_timeout, self.osd_client.fetch_invalidated(&osd, &creds)).await {
                Ok(()) => debug!("OSD {} fetched invalidated data of {}", osd, change.file_id),
                Err(e) => warn!("OSD {} failed to fetch {}: {}", osd, change.file_id, e),
            }
        }
    }

    fn abandon(&self, file_id: &GlobalFileId, target_version: u64) {
        self.queue
            .in_flight
            .remove_if(file_id, |_, version| *version == target_version);
    }
}

/// Run an OSD call, failing with [`Error::Timeout`] once `limit` has passed.
async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(Error::Timeout))
}

/// New replicas that must copy the latest data so every read quorum of the
/// target list contains an up-to-date replica.
fn replicas_to_fetch(
    change: &XLocSetChange,
    acknowledged: &[(OsdUuid, InvalidateResponse)],
) -> Vec<OsdUuid> {
    let replicas = change.target.len();
    let read_quorum = replicas / 2 + 1;
    let newest = acknowledged
        .iter()
        .filter_map(|(_, resp)| resp.status)
        .map(|s| (s.truncate_epoch, s.max_object_version))
        .max();
    let up_to_date = match newest {
        Some(newest) => acknowledged
            .iter()
            .filter(|(_, resp)| {
                resp.status
                    .is_none_or(|s| (s.truncate_epoch, s.max_object_version) == newest)
            })
            .count(),
        None => acknowledged.len(),
    };
    let required = (replicas + 1)
        .saturating_sub(read_quorum)
        .saturating_sub(up_to_date);

    change
        .target
        .head_osds()
        .into_iter()
        .filter(|osd| !change.current.contains_osd(osd))
        .take(required)
        .cloned()
        .collect()
}
