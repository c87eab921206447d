use super::Response;
use crate::context::MrcContext;
use crate::coordinator::{XLocSetChange, XLocSetCoordinator};
use mrc_common::Result;
use mrc_meta_store::{FileMetadata, XLocSetLockState};
use tracing::{error, info, warn};

/// Install the target list of `change` and release the lock.
///
/// The in-flight record of the change is cleared in every case. If the file
/// is gone or its lock no longer belongs to this change, nothing is written.
pub(super) fn handle(ctx: &MrcContext, change: XLocSetChange) -> Result<Response> {
    let result = install(ctx, &change);
    if let Err(e) = &result {
        error!(
            "Installing version {} of {} failed: {}",
            change.target.version, change.file_id, e
        );
        if let Err(e) = handle_install_error(ctx, &change) {
            error!(
                "Could not unlock {}, leaving it for recovery: {}",
                change.file_id, e
            );
        }
    }
    ctx.coordinator
        .finish(&change.file_id, change.target.version);
    result
}

fn install(ctx: &MrcContext, change: &XLocSetChange) -> Result<Response> {
    let sm = ctx.volume(&change.file_id.volume_id)?;
    let Some(file) = sm.get_metadata(change.file_id.file_id)? else {
        warn!("{} was deleted before its replica change finished", change.file_id);
        return Ok(Response::Empty);
    };
    if !holds_lock(ctx, &file, change) {
        warn!(
            "{} is no longer locked for version {}; skipping install",
            change.file_id, change.target.version
        );
        return Ok(Response::Empty);
    }

    let mut update = sm.create_atomic_update();
    XLocSetCoordinator::unlock_xlocset(&sm, file.with_xloc_list(change.target.clone()), &mut update);
    ctx.commit(update)?;
    info!(
        "Installed version {} of {} ({} replicas)",
        change.target.version,
        change.file_id,
        change.target.len()
    );
    Ok(Response::Empty)
}

/// Put the previous membership back under a version above the target, so
/// OSDs that already saw the invalidation accept the file again.
fn handle_install_error(ctx: &MrcContext, change: &XLocSetChange) -> Result<()> {
    let sm = ctx.volume(&change.file_id.volume_id)?;
    let Some(file) = sm.get_metadata(change.file_id.file_id)? else {
        return Ok(());
    };
    if !holds_lock(ctx, &file, change) {
        return Ok(());
    }
    let fallback = change.current.with_version(change.target.version + 1);
    let mut update = sm.create_atomic_update();
    XLocSetCoordinator::unlock_xlocset(&sm, file.with_xloc_list(fallback), &mut update);
    ctx.commit(update)
}

fn holds_lock(ctx: &MrcContext, file: &FileMetadata, change: &XLocSetChange) -> bool {
    matches!(
        &file.xlocset_lock,
        XLocSetLockState::Locked { target_version, owner_generation, .. }
            if *target_version == change.target.version
                && *owner_generation == ctx.coordinator.generation()
                && file.xloc_list.version == change.current.version
    )
}
