//! Per-volume operation locks.
//!
//! [`VolumeLocks`] guarantees that at most one stage / unstage operation is
//! in flight for a given volume id.  Acquisition never blocks: a caller that
//! loses the race is expected to report contention and let the CSI caller
//! retry.

use dashmap::DashSet;
use std::sync::Arc;
use tracing::debug;

/// Set of volume ids with an operation in flight.
#[derive(Debug, Default)]
pub struct VolumeLocks {
    held: DashSet<String>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock for `volume_id`.  Returns `true` iff this call
    /// obtained it.
    pub fn try_acquire(&self, volume_id: &str) -> bool {
        let acquired = self.held.insert(volume_id.to_owned());
        if !acquired {
            debug!(%volume_id, "volume lock already held");
        }
        acquired
    }

    /// Release the lock for `volume_id`.  Releasing a free lock is a no-op.
    pub fn release(&self, volume_id: &str) {
        self.held.remove(volume_id);
    }

    /// Like [`Self::try_acquire`], but returns a guard that releases the lock
    /// when dropped.
    pub fn acquire_guard(self: &Arc<Self>, volume_id: &str) -> Option<VolumeLockGuard> {
        self.try_acquire(volume_id).then(|| VolumeLockGuard {
            locks: Arc::clone(self),
            volume_id: volume_id.to_owned(),
        })
    }

    /// Whether `volume_id` currently has an operation in flight.
    pub fn is_held(&self, volume_id: &str) -> bool {
        self.held.contains(volume_id)
    }
}

/// Releases its volume lock on drop, including on early returns and panics.
#[derive(Debug)]
pub struct VolumeLockGuard {
    locks: Arc<VolumeLocks>,
    volume_id: String,
}

impl Drop for VolumeLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.volume_id);
    }
}
