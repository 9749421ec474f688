use std::collections::BTreeMap;
use std::future::Future;

use crate::error::ScdResult;
use crate::types::{BatchId, RecordKey};

/// Result of [`StateStore::try_begin_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchClaim {
    /// The caller now owns the batch.
    Claimed,
    /// The batch was already committed.
    Committed,
    /// Another caller is processing the batch.
    InProgress,
}

/// Trait for storing the engine's batch and key state.
///
/// Implementations should ensure thread-safety and handle concurrent access to the data.
pub trait StateStore {
    /// Returns `true` when the batch was already committed.
    fn is_batch_committed(&self, batch_id: &str) -> impl Future<Output = ScdResult<bool>> + Send;

    /// Claims the batch for processing.
    ///
    /// Claiming and checking happen under one lock: of two concurrent claims of the same batch
    /// only one returns [`BatchClaim::Claimed`]. A claimed batch must be finished with
    /// [`StateStore::finish_batch`].
    fn try_begin_batch(
        &self,
        batch_id: BatchId,
    ) -> impl Future<Output = ScdResult<BatchClaim>> + Send;

    /// Releases the claim on the batch, recording it as committed when `committed` is `true`.
    ///
    /// A batch released without being committed can be claimed again.
    fn finish_batch(
        &self,
        batch_id: &str,
        committed: bool,
    ) -> impl Future<Output = ScdResult<()>> + Send;

    /// Excludes `key` from processing until it is released.
    ///
    /// `reason` is kept for operators and should describe the violated invariant.
    fn quarantine_key(
        &self,
        key: RecordKey,
        reason: String,
    ) -> impl Future<Output = ScdResult<()>> + Send;

    /// Returns `true` when `key` is quarantined.
    fn is_key_quarantined(
        &self,
        key: &RecordKey,
    ) -> impl Future<Output = ScdResult<bool>> + Send;

    /// Returns every quarantined key with the reason it was quarantined.
    fn get_quarantined_keys(
        &self,
    ) -> impl Future<Output = ScdResult<BTreeMap<RecordKey, String>>> + Send;

    /// Releases a quarantined key, returning `false` when it was not quarantined.
    fn release_key(&self, key: &RecordKey) -> impl Future<Output = ScdResult<bool>> + Send;
}
