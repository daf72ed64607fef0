//! Per-user serialization.
//!
//! Notifications for the same user must be processed strictly serially —
//! two in flight at once can both read the same stale cursor and
//! double-process a batch, or write cursors out of order. Different
//! users share nothing and run fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Keyed async mutexes, one per user identity.
///
/// Entries are created on demand and kept for the process lifetime; the
/// map is bounded by the number of known accounts.
#[derive(Default)]
pub struct UserLocks {
    inner: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind any in-flight holder.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let existing = {
            let map = self.inner.read().await;
            map.get(key).cloned()
        };

        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut map = self.inner.write().await;
                Arc::clone(map.entry(key.to_string()).or_default())
            }
        };

        lock.lock_owned().await
    }
}
