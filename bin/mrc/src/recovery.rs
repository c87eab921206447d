//! Repair of reconfigurations that can no longer finish

use crate::coordinator::MrcUpdate;
use crate::lock::XLocSetLock;
use mrc_meta_store::{FileMetadata, StorageManager, XLocSetLockState};
use tracing::{info, warn};

/// Stage the repair of a crashed reconfiguration of `file` and return the
/// repaired metadata. Files without a crashed lock are returned unchanged.
///
/// If the target list was never installed, the installed membership is
/// re-installed under the next version so that OSDs which saw the
/// invalidation accept requests again. A lock whose target is already
/// installed is only cleared. Running this on the result is a no-op.
pub fn recover_xlocset(
    sm: &StorageManager,
    file: FileMetadata,
    lock: &XLocSetLock,
    update: &mut MrcUpdate,
) -> FileMetadata {
    let Some(target) = lock.target_version() else {
        return file;
    };
    if !lock.has_crashed() {
        return file;
    }

    let installed = file.xloc_list.version;
    let recovered = if installed >= target {
        info!(
            "Clearing stale replica lock of {}:{} (version {}, target {})",
            sm.volume().name,
            file.path,
            installed,
            target
        );
        file.with_lock(XLocSetLockState::Unlocked)
    } else {
        warn!(
            "Recovering interrupted replica change of {}:{} (version {}, target {})",
            sm.volume().name,
            file.path,
            installed,
            target
        );
        let reinstalled = file.xloc_list.with_version(installed + 1);
        let issued_epoch = file.issued_epoch + 1;
        file.with_xloc_list(reinstalled)
            .with_issued_epoch(issued_epoch)
            .with_lock(XLocSetLockState::Unlocked)
    };
    sm.set_metadata(recovered.clone(), update);
    recovered
}
