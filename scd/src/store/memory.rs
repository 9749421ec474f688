use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ScdResult;
use crate::store::{BatchClaim, StateStore};
use crate::types::{BatchId, RecordKey};

/// Inner state of [`MemoryStateStore`]
#[derive(Debug)]
struct Inner {
    committed_batches: HashSet<BatchId>,
    /// Batches claimed and not yet finished.
    in_flight: HashSet<BatchId>,
    /// Quarantined keys with the reason they were quarantined.
    quarantined_keys: BTreeMap<RecordKey, String>,
}

/// In-memory [`StateStore`] for testing and development.
///
/// All state is lost when the process terminates.
#[derive(Debug, Clone)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        let inner = Inner {
            committed_batches: HashSet::new(),
            in_flight: HashSet::new(),
            quarantined_keys: BTreeMap::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    async fn is_batch_committed(&self, batch_id: &str) -> ScdResult<bool> {
        let inner = self.inner.lock().await;

        Ok(inner.committed_batches.contains(batch_id))
    }

    async fn try_begin_batch(&self, batch_id: BatchId) -> ScdResult<BatchClaim> {
        let mut inner = self.inner.lock().await;

        if inner.committed_batches.contains(&batch_id) {
            return Ok(BatchClaim::Committed);
        }
        if !inner.in_flight.insert(batch_id) {
            return Ok(BatchClaim::InProgress);
        }

        Ok(BatchClaim::Claimed)
    }

    async fn finish_batch(&self, batch_id: &str, committed: bool) -> ScdResult<()> {
        let mut inner = self.inner.lock().await;

        let claimed = inner.in_flight.remove(batch_id);
        if claimed && committed {
            inner.committed_batches.insert(batch_id.to_string());
        }

        Ok(())
    }

    async fn quarantine_key(&self, key: RecordKey, reason: String) -> ScdResult<()> {
        let mut inner = self.inner.lock().await;
        inner.quarantined_keys.insert(key, reason);

        Ok(())
    }

    async fn is_key_quarantined(&self, key: &RecordKey) -> ScdResult<bool> {
        let inner = self.inner.lock().await;

        Ok(inner.quarantined_keys.contains_key(key))
    }

    async fn get_quarantined_keys(&self) -> ScdResult<BTreeMap<RecordKey, String>> {
        let inner = self.inner.lock().await;

        Ok(inner.quarantined_keys.clone())
    }

    async fn release_key(&self, key: &RecordKey) -> ScdResult<bool> {
        let mut inner = self.inner.lock().await;

        Ok(inner.quarantined_keys.remove(key).is_some())
    }
}
