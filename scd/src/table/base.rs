use std::future::Future;

use crate::error::ScdResult;
use crate::types::{HistorizedRow, MutationPlan, RecordKey};

/// Trait for tables that store the historized rows of every key.
///
/// Implementations must commit the writes of a [`MutationPlan`] atomically: either every write of
/// the plan becomes visible or none does. A commit must be rejected with
/// [`ErrorKind::ConcurrentModification`](crate::error::ErrorKind::ConcurrentModification) when the
/// stored rows of the key no longer match [`MutationPlan::precondition`], which is what keeps two
/// writers of the same key from both closing its current row.
///
/// Implementations should reject with
/// [`ErrorKind::InvariantViolation`](crate::error::ErrorKind::InvariantViolation) any commit that
/// would leave the key with overlapping intervals or more than one current row.
pub trait HistorizedTable {
    /// Returns the name of the table.
    fn name(&self) -> &str;

    /// Returns every stored row of `key`, ordered by `effective_start`.
    fn read_history(
        &self,
        key: &RecordKey,
    ) -> impl Future<Output = ScdResult<Vec<HistorizedRow>>> + Send;

    /// Returns the current row of `key`, if any.
    fn read_current(
        &self,
        key: &RecordKey,
    ) -> impl Future<Output = ScdResult<Option<HistorizedRow>>> + Send {
        let history = self.read_history(key);
        async move {
            let history = history.await?;
            Ok(history.into_iter().find(|row| row.is_current))
        }
    }

    /// Atomically applies the writes of `plan`, conditionally on its precondition.
    fn commit(&self, plan: &MutationPlan) -> impl Future<Output = ScdResult<()>> + Send;
}
