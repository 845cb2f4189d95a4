//! Per-document serialization of state-changing operations.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockTable = DashMap<Uuid, Arc<Mutex<()>>>;

/// Async lock table keyed by document id.
///
/// Guards only serialize writers inside one process; the repository's version
/// check covers writers in other processes. An entry lives only while some
/// task holds or waits on it.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Arc<LockTable>,
}

/// Held lock on one document. Releasing the last interest removes the entry.
pub struct DocumentGuard {
    guard: Option<OwnedMutexGuard<()>>,
    document_id: Uuid,
    locks: Arc<LockTable>,
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        self.guard.take();
        // The table's own reference is the only one left when nobody waits.
        self.locks
            .remove_if(&self.document_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, document_id: Uuid) -> DocumentGuard {
        let lock = self
            .locks
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        DocumentGuard {
            guard: Some(lock.lock_owned().await),
            document_id,
            locks: self.locks.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
