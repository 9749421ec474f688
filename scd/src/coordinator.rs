use config::shared::MaterializationConfig;
use metrics::{counter, histogram};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, error, info, info_span, warn};

use crate::apply::{ApplyFailure, ApplyOutcome, MergeApplier};
use crate::bail;
use crate::error::{ErrorKind, ScdResult};
use crate::metrics::{
    ERROR_KIND_LABEL, REASON_LABEL, SCD_BATCH_DURATION_SECONDS, SCD_KEY_APPLY_DURATION_SECONDS,
    SCD_KEY_APPLY_FAILURES_TOTAL, SCD_RECORDS_MALFORMED_TOTAL, SCD_RECORDS_NOOP_TOTAL,
    SCD_RECORDS_RECEIVED_TOTAL, SCD_ROWS_CLOSED_TOTAL, SCD_ROWS_OPENED_TOTAL,
    SCD_ROWS_UPDATED_IN_PLACE_TOTAL, TARGET_LABEL, register_metrics,
};
use crate::normalize::Normalizer;
use crate::reconcile::HistoryReconciler;
use crate::sequencer::Sequencer;
use crate::store::{BatchClaim, StateStore};
use crate::table::HistorizedTable;
use crate::types::{BatchId, NoOpReason, RawChangeRecord, RecordKey};
use crate::workers::key::{KeyReport, KeyWorker};
use crate::workers::pool::{KeyTaskOutcome, KeyWorkerPool};

/// Outcome of one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub records_received: usize,
    /// Records rejected by the normalizer.
    pub malformed_records: usize,
    /// Records dropped because a later arrival carried the same key and sequence.
    pub superseded_records: usize,
    /// Records older than the history of their key.
    pub stale_records: usize,
    /// Records that did not modify the history, stale records included.
    pub noop_records: usize,
    /// Keys that had at least one well-formed record.
    pub keys_processed: usize,
    pub keys_succeeded: usize,
    /// Keys whose plan was found already committed.
    pub keys_already_applied: usize,
    pub rows_opened: usize,
    pub rows_closed: usize,
    pub rows_updated_in_place: usize,
    pub failures: Vec<ApplyFailure>,
    /// Keys quarantined while processing this batch.
    pub quarantined_keys: Vec<RecordKey>,
    /// Keys skipped because the batch deadline passed before they started.
    pub abandoned_keys: Vec<RecordKey>,
}

impl BatchSummary {
    fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            ..Default::default()
        }
    }

    /// Returns `true` when every key of the batch was applied.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.abandoned_keys.is_empty()
    }

    pub fn keys_failed(&self) -> usize {
        self.failures.len()
    }

    fn record_report(&mut self, report: &KeyReport) {
        self.keys_succeeded += 1;
        if report.outcome == ApplyOutcome::AlreadyApplied {
            self.keys_already_applied += 1;
        }

        let plan = &report.plan;
        self.rows_opened += plan.rows_opened();
        self.rows_closed += plan.rows_closed();
        self.rows_updated_in_place += plan.rows_updated_in_place();
        self.stale_records += plan.noops(NoOpReason::Stale);
        self.noop_records += NoOpReason::ALL
            .iter()
            .map(|reason| plan.noops(*reason))
            .sum::<usize>();
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "batch {}", self.batch_id)?;
        writeln!(
            f,
            "  records: {} received, {} malformed, {} superseded, {} stale, {} no-op",
            self.records_received,
            self.malformed_records,
            self.superseded_records,
            self.stale_records,
            self.noop_records
        )?;
        writeln!(
            f,
            "  keys: {} processed, {} succeeded, {} failed, {} abandoned",
            self.keys_processed,
            self.keys_succeeded,
            self.keys_failed(),
            self.abandoned_keys.len()
        )?;
        write!(
            f,
            "  rows: {} opened, {} closed, {} updated in place",
            self.rows_opened, self.rows_closed, self.rows_updated_in_place
        )?;
        for failure in &self.failures {
            write!(f, "\n  failed {failure}")?;
        }
        for key in &self.quarantined_keys {
            write!(f, "\n  quarantined {key}")?;
        }
        for key in &self.abandoned_keys {
            write!(f, "\n  abandoned {key}")?;
        }
        Ok(())
    }
}

/// Drives batches of change records into a historized table.
///
/// Each batch is normalized, grouped and ordered per key, then every key is reconciled and applied
/// by its own worker. Keys are independent: the failure of one key is reported in the
/// [`BatchSummary`] and never stops the others.
#[derive(Debug)]
pub struct BatchCoordinator<T, S> {
    config: Arc<MaterializationConfig>,
    target: Arc<str>,
    reconciler: Arc<HistoryReconciler>,
    applier: MergeApplier<T>,
    state_store: S,
}

impl<T, S> BatchCoordinator<T, S>
where
    T: HistorizedTable + Clone + Send + Sync + 'static,
    S: StateStore + Clone + Send + Sync + 'static,
{
    /// Creates a coordinator after validating `config`.
    pub fn new(config: MaterializationConfig, table: T, state_store: S) -> ScdResult<Self> {
        config.validate()?;
        register_metrics();

        Ok(Self {
            target: Arc::from(config.target.as_str()),
            reconciler: Arc::new(HistoryReconciler::new(&config)),
            config: Arc::new(config),
            applier: MergeApplier::new(table),
            state_store,
        })
    }

    pub fn config(&self) -> &MaterializationConfig {
        &self.config
    }

    pub fn table(&self) -> &T {
        self.applier.table()
    }

    pub fn state_store(&self) -> &S {
        &self.state_store
    }

    /// Processes one batch of raw records, given in arrival order.
    ///
    /// Fails only when the batch as a whole cannot be processed, for example when `once_only` is
    /// set and the batch was already committed. Per-key failures are reported in the summary.
    pub async fn process_batch<I>(
        &self,
        batch_id: impl Into<BatchId>,
        records: I,
    ) -> ScdResult<BatchSummary>
    where
        I: IntoIterator<Item = RawChangeRecord>,
    {
        let batch_id = batch_id.into();
        let span = info_span!("process_batch", target = %self.target, batch_id = %batch_id);

        self.process_batch_inner(batch_id, records)
            .instrument(span)
            .await
    }

    async fn process_batch_inner<I>(
        &self,
        batch_id: BatchId,
        records: I,
    ) -> ScdResult<BatchSummary>
    where
        I: IntoIterator<Item = RawChangeRecord>,
    {
        if !self.config.once_only {
            return self.run_batch(batch_id, records).await;
        }

        match self.state_store.try_begin_batch(batch_id.clone()).await? {
            BatchClaim::Claimed => {}
            BatchClaim::Committed => bail!(
                ErrorKind::BatchAlreadyCommitted,
                "Batch was already committed",
                format!("batch `{batch_id}` cannot be processed twice")
            ),
            BatchClaim::InProgress => bail!(
                ErrorKind::BatchInProgress,
                "Batch is being processed",
                format!("batch `{batch_id}` is already being processed by another caller")
            ),
        }

        let result = self.run_batch(batch_id.clone(), records).await;

        // An incomplete batch is released so that it can be retried.
        let committed = result.as_ref().is_ok_and(BatchSummary::is_complete);
        self.state_store.finish_batch(&batch_id, committed).await?;

        result
    }

    async fn run_batch<I>(&self, batch_id: BatchId, records: I) -> ScdResult<BatchSummary>
    where
        I: IntoIterator<Item = RawChangeRecord>,
    {
        let started = Instant::now();
        let mut summary = BatchSummary::new(batch_id);

        let raw_records: Vec<RawChangeRecord> = records.into_iter().collect();
        summary.records_received = raw_records.len();

        let mut normalizer = Normalizer::new(&self.config);
        let (records, rejected) = normalizer.normalize_all(raw_records);
        summary.malformed_records = rejected.len();
        for err in &rejected {
            warn!(error = %err, "dropping malformed record");
        }

        let sequenced = Sequencer::new(self.config.tie_break).sequence(records);
        summary.superseded_records = sequenced.superseded();
        summary.keys_processed = sequenced.key_count();

        info!(
            records = summary.records_received,
            malformed = summary.malformed_records,
            keys = summary.keys_processed,
            "processing batch"
        );

        let mut pool = KeyWorkerPool::new(
            self.config.batch.max_concurrent_keys,
            self.config.batch.timeout_ms.map(Duration::from_millis),
        );
        for key_records in sequenced {
            let key = key_records.key.clone();
            let worker = KeyWorker::new(
                self.target.clone(),
                key_records,
                self.reconciler.clone(),
                self.applier.clone(),
                self.state_store.clone(),
                self.config.retry.clone(),
            );

            let target = self.target.clone();
            let span = info_span!("apply_key", key = %key);
            pool.spawn(
                key,
                async move {
                    let started = Instant::now();
                    let result = worker.run().await;
                    histogram!(
                        SCD_KEY_APPLY_DURATION_SECONDS,
                        TARGET_LABEL => target.to_string(),
                    )
                    .record(started.elapsed().as_secs_f64());

                    result
                }
                .instrument(span),
            );
        }

        for (key, outcome) in pool.wait_all().await {
            match outcome {
                KeyTaskOutcome::Completed(report) => summary.record_report(&report),
                KeyTaskOutcome::Failed(err) => {
                    error!(%key, error = %err, "failed to apply key");
                    counter!(
                        SCD_KEY_APPLY_FAILURES_TOTAL,
                        TARGET_LABEL => self.target.to_string(),
                        ERROR_KIND_LABEL => format!("{:?}", err.kind()),
                    )
                    .increment(1);

                    if err.kind() == ErrorKind::InvariantViolation {
                        summary.quarantined_keys.push(key.clone());
                    }
                    summary.failures.push(ApplyFailure::new(key, err));
                }
                KeyTaskOutcome::Abandoned => summary.abandoned_keys.push(key),
            }
        }

        summary.failures.sort_by(|a, b| a.key.cmp(&b.key));
        summary.quarantined_keys.sort();
        summary.abandoned_keys.sort();

        if !summary.abandoned_keys.is_empty() {
            warn!(
                abandoned = summary.abandoned_keys.len(),
                "batch deadline passed, some keys were not processed"
            );
        }

        self.emit_metrics(&summary, started.elapsed());

        info!(
            keys_succeeded = summary.keys_succeeded,
            keys_failed = summary.keys_failed(),
            rows_opened = summary.rows_opened,
            rows_closed = summary.rows_closed,
            rows_updated_in_place = summary.rows_updated_in_place,
            "batch processed"
        );

        Ok(summary)
    }

    fn emit_metrics(&self, summary: &BatchSummary, elapsed: Duration) {
        let target = self.target.to_string();

        counter!(SCD_RECORDS_RECEIVED_TOTAL, TARGET_LABEL => target.clone())
            .increment(summary.records_received as u64);
        counter!(SCD_RECORDS_MALFORMED_TOTAL, TARGET_LABEL => target.clone())
            .increment(summary.malformed_records as u64);
        counter!(
            SCD_RECORDS_NOOP_TOTAL,
            TARGET_LABEL => target.clone(),
            REASON_LABEL => NoOpReason::Stale.as_str(),
        )
        .increment(summary.stale_records as u64);
        counter!(
            SCD_RECORDS_NOOP_TOTAL,
            TARGET_LABEL => target.clone(),
            REASON_LABEL => "other",
        )
        .increment((summary.noop_records - summary.stale_records) as u64);
        counter!(SCD_ROWS_OPENED_TOTAL, TARGET_LABEL => target.clone())
            .increment(summary.rows_opened as u64);
        counter!(SCD_ROWS_CLOSED_TOTAL, TARGET_LABEL => target.clone())
            .increment(summary.rows_closed as u64);
        counter!(SCD_ROWS_UPDATED_IN_PLACE_TOTAL, TARGET_LABEL => target.clone())
            .increment(summary.rows_updated_in_place as u64);
        histogram!(SCD_BATCH_DURATION_SECONDS, TARGET_LABEL => target)
            .record(elapsed.as_secs_f64());
    }
}
