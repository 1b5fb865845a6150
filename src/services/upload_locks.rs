//! Per-upload serialization of appends.
//!
//! Two appends against the same upload would otherwise both read the same
//! starting offset, both pass validation and both write. Holding the guard
//! across validate-write-update makes the second request observe the first
//! one's committed offset. Locks are process-local.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Entries with no outstanding guard are pruned once the table grows past this.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Clone, Default)]
pub struct UploadLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to upload `id`.
    pub async fn lock(&self, id: i64) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if table.len() >= PRUNE_THRESHOLD {
                table.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            table.entry(id).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Drop the slot for an upload that no longer exists.
    pub fn forget(&self, id: i64) {
        let mut table = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.remove(&id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map(|t| t.len()).unwrap_or(0)
    }
}
