//! Conditional commit of mutation plans to the historized table.

use std::fmt;
use tracing::{debug, warn};

use crate::error::{ErrorKind, ScdError, ScdResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{APPLY_AFTER_COMMIT, APPLY_BEFORE_COMMIT, scd_fail_point};
use crate::table::HistorizedTable;
use crate::types::{MutationPlan, RecordKey};

/// Result of applying one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The writes of the plan were committed.
    Committed,
    /// The plan had no writes, nothing was sent to the table.
    NothingToWrite,
    /// The writes of the plan were already present in the table, typically because an earlier
    /// commit succeeded but its acknowledgement was lost.
    AlreadyApplied,
}

/// A key whose changes could not be applied.
#[derive(Debug, Clone)]
pub struct ApplyFailure {
    pub key: RecordKey,
    pub error: ScdError,
}

impl ApplyFailure {
    pub fn new(key: RecordKey, error: ScdError) -> Self {
        Self { key, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Returns a human readable reason for the failure.
    pub fn reason(&self) -> String {
        match self.error.detail() {
            Some(detail) => format!("{}: {detail}", self.error.description()),
            None => self.error.to_string(),
        }
    }
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.key, self.kind(), self.reason())
    }
}

/// Writes [`MutationPlan`]s to a [`HistorizedTable`].
///
/// Each plan is committed atomically and conditionally on the state it was computed against. When
/// the condition fails, the applier checks whether the table already contains the plan's writes
/// before reporting [`ErrorKind::ConcurrentModification`] to the caller, so that re-sending a plan
/// never writes it twice.
#[derive(Debug, Clone)]
pub struct MergeApplier<T> {
    table: T,
}

impl<T> MergeApplier<T>
where
    T: HistorizedTable + Sync,
{
    pub fn new(table: T) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub async fn apply(&self, plan: &MutationPlan) -> ScdResult<ApplyOutcome> {
        if plan.is_noop() {
            return Ok(ApplyOutcome::NothingToWrite);
        }

        #[cfg(feature = "failpoints")]
        scd_fail_point(APPLY_BEFORE_COMMIT)?;

        if let Err(err) = self.table.commit(plan).await {
            if err.kind() != ErrorKind::ConcurrentModification {
                return Err(err);
            }

            let history = self.table.read_history(&plan.key).await?;
            if plan.is_reflected_in(&history) {
                debug!(key = %plan.key, "plan already applied, skipping commit");
                return Ok(ApplyOutcome::AlreadyApplied);
            }

            warn!(key = %plan.key, error = %err, "history changed while applying plan");
            return Err(err);
        }

        #[cfg(feature = "failpoints")]
        scd_fail_point(APPLY_AFTER_COMMIT)?;

        Ok(ApplyOutcome::Committed)
    }
}
