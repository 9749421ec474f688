use config::shared::RetryConfig;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::apply::{ApplyOutcome, MergeApplier};
use crate::bail;
use crate::error::{ErrorKind, ScdResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{KEY_WORKER_BEFORE_READ, scd_fail_point};
use crate::metrics::{
    ERROR_KIND_LABEL, SCD_KEY_APPLY_RETRIES_TOTAL, SCD_KEYS_QUARANTINED_TOTAL, TARGET_LABEL,
};
use crate::reconcile::HistoryReconciler;
use crate::sequencer::KeyRecords;
use crate::store::StateStore;
use crate::table::HistorizedTable;
use crate::types::{MutationPlan, RecordKey};
use crate::workers::policy::{RetryDirective, build_error_handling_policy};

/// Result of a key worker that finished without error.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyReport {
    pub key: RecordKey,
    /// The plan that was applied last.
    pub plan: MutationPlan,
    pub outcome: ApplyOutcome,
    /// Number of attempts, including the first one.
    pub attempts: u32,
}

/// Reads, reconciles and applies the records of a single key.
///
/// The worker retries according to the [`RetryConfig`]: storage failures re-send the same plan,
/// concurrent modifications read the history again and compute a new plan. A key whose history
/// breaks the invariants is quarantined in the [`StateStore`] and not retried.
#[derive(Debug)]
pub struct KeyWorker<T, S> {
    target: Arc<str>,
    key_records: KeyRecords,
    reconciler: Arc<HistoryReconciler>,
    applier: MergeApplier<T>,
    state_store: S,
    retry: RetryConfig,
}

impl<T, S> KeyWorker<T, S>
where
    T: HistorizedTable + Sync,
    S: StateStore + Sync,
{
    pub fn new(
        target: Arc<str>,
        key_records: KeyRecords,
        reconciler: Arc<HistoryReconciler>,
        applier: MergeApplier<T>,
        state_store: S,
        retry: RetryConfig,
    ) -> Self {
        Self {
            target,
            key_records,
            reconciler,
            applier,
            state_store,
            retry,
        }
    }

    pub async fn run(self) -> ScdResult<KeyReport> {
        let key = self.key_records.key.clone();

        if self.state_store.is_key_quarantined(&key).await? {
            bail!(
                ErrorKind::KeyQuarantined,
                "Key is quarantined",
                format!(
                    "{} records of key {key} were not applied",
                    self.key_records.records.len()
                )
            );
        }

        let mut plan: Option<MutationPlan> = None;
        let mut attempts = 1;
        loop {
            let err = match self.attempt(&mut plan).await {
                Ok(outcome) => {
                    let Some(plan) = plan else {
                        bail!(
                            ErrorKind::InvalidState,
                            "Key worker finished without a plan",
                            format!("key {key}")
                        );
                    };

                    debug!(%key, ?outcome, attempts, "key applied");

                    return Ok(KeyReport {
                        key,
                        plan,
                        outcome,
                        attempts,
                    });
                }
                Err(err) => err,
            };

            let policy = build_error_handling_policy(&err);
            match policy.retry_directive() {
                RetryDirective::Quarantine => {
                    error!(%key, error = %err, "history of key is corrupt, quarantining key");
                    self.state_store
                        .quarantine_key(key.clone(), err.to_string())
                        .await?;
                    counter!(
                        SCD_KEYS_QUARANTINED_TOTAL,
                        TARGET_LABEL => self.target.to_string(),
                    )
                    .increment(1);

                    return Err(err);
                }
                directive @ (RetryDirective::Timed | RetryDirective::Replan)
                    if attempts < self.retry.max_attempts =>
                {
                    if directive == RetryDirective::Replan {
                        plan = None;
                    }

                    let delay = self.retry.delay_after_attempt(attempts);
                    warn!(
                        %key,
                        error = %err,
                        attempt = attempts,
                        ?directive,
                        delay_ms = delay.as_millis() as u64,
                        "key apply failed, retrying"
                    );
                    counter!(
                        SCD_KEY_APPLY_RETRIES_TOTAL,
                        TARGET_LABEL => self.target.to_string(),
                        ERROR_KIND_LABEL => format!("{:?}", err.kind()),
                    )
                    .increment(1);

                    tokio::time::sleep(delay).await;
                    attempts += 1;
                }
                directive => {
                    info!(
                        %key,
                        error = %err,
                        attempts,
                        ?directive,
                        solution = policy.solution().unwrap_or("none"),
                        "key apply failed"
                    );

                    return Err(err);
                }
            }
        }
    }

    /// Computes a plan unless one is pending, then applies it.
    async fn attempt(&self, plan: &mut Option<MutationPlan>) -> ScdResult<ApplyOutcome> {
        let key = &self.key_records.key;

        if plan.is_none() {
            #[cfg(feature = "failpoints")]
            scd_fail_point(KEY_WORKER_BEFORE_READ)?;

            let history = self.applier.table().read_history(key).await?;
            let computed = self
                .reconciler
                .reconcile(key, &history, &self.key_records.records)?;
            *plan = Some(computed);
        }

        let Some(plan) = plan.as_ref() else {
            bail!(
                ErrorKind::InvalidState,
                "No plan was computed for the key",
                format!("key {key}")
            );
        };

        self.applier.apply(plan).await
    }
}
