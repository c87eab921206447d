//! Replica-set reconfiguration lock
//!
//! The persisted [`XLocSetLockState`] says whether a change was started.
//! Whether that change can still finish depends on the running server, so
//! the crash verdict is derived here from three facts:
//!
//! * the generation that took the lock is not the live generation (restart),
//! * the installed version already reached the target (stale record),
//! * the live coordinator has no in-flight change for the target (abandoned).

use mrc_meta_store::{FileMetadata, XLocSetLockState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLocSetLock {
    state: XLocSetLockState,
    crashed: bool,
}

impl XLocSetLock {
    /// Derive the lock of `file` as seen by the server running in
    /// `live_generation`, whose coordinator is driving a change to
    /// `in_flight_target` (if any).
    #[must_use]
    pub fn derive(file: &FileMetadata, live_generation: u64, in_flight_target: Option<u64>) -> Self {
        let crashed = match &file.xlocset_lock {
            XLocSetLockState::Unlocked => false,
            XLocSetLockState::Locked {
                target_version,
                owner_generation,
                ..
            } => {
                *owner_generation != live_generation
                    || file.xloc_list.version >= *target_version
                    || in_flight_target != Some(*target_version)
            }
        };
        Self {
            state: file.xlocset_lock.clone(),
            crashed,
        }
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    #[must_use]
    pub const fn has_crashed(&self) -> bool {
        self.crashed
    }

    /// Locked by a change that can still complete
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.is_locked() && !self.crashed
    }

    #[must_use]
    pub const fn target_version(&self) -> Option<u64> {
        match &self.state {
            XLocSetLockState::Locked { target_version, .. } => Some(*target_version),
            XLocSetLockState::Unlocked => None,
        }
    }
}
