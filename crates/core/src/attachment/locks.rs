//! Per-owner serialization of reconciler cycles.
//!
//! Two concurrent updates for the same owner can interleave their read and
//! delete phases so that one destroys objects the other just committed as
//! current. When enabled, cycles for one owner run one at a time inside this
//! process. Cycles for different owners never wait on each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::types::OwnerKind;

type OwnerKey = (OwnerKind, Uuid);

/// Lock table keyed by owner.
#[derive(Debug, Clone, Default)]
pub struct OwnerLocks {
    locks: Arc<DashMap<OwnerKey, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `owner_id`.
    ///
    /// The returned guard releases the lock when dropped.
    pub async fn acquire(&self, kind: OwnerKind, owner_id: Uuid) -> OwnerGuard {
        let key = (kind, owner_id);
        // Clone the mutex out so the shard lock is not held across the await.
        let mutex = Arc::clone(self.locks.entry(key).or_default().value());
        let guard = mutex.lock_owned().await;

        OwnerGuard {
            key,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of owners with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no owner currently holds or waits on a lock.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one owner.
#[derive(Debug)]
pub struct OwnerGuard {
    key: OwnerKey,
    locks: Arc<DashMap<OwnerKey, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Table entry plus nobody else: no holder, no waiter.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
