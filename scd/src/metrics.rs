//! Metrics definitions for materialization monitoring.

use metrics::{Unit, describe_counter, describe_histogram};
use std::sync::Once;

static REGISTER_METRICS: Once = Once::new();

/// Label for the target table name in metrics.
pub const TARGET_LABEL: &str = "target";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for the reason a record produced no change.
pub const REASON_LABEL: &str = "reason";

/// Counter for records received by the coordinator.
pub const SCD_RECORDS_RECEIVED_TOTAL: &str = "scd_records_received_total";

/// Counter for records rejected by the normalizer.
pub const SCD_RECORDS_MALFORMED_TOTAL: &str = "scd_records_malformed_total";

/// Counter for records that produced no change, labeled by reason.
pub const SCD_RECORDS_NOOP_TOTAL: &str = "scd_records_noop_total";

pub const SCD_ROWS_OPENED_TOTAL: &str = "scd_rows_opened_total";

pub const SCD_ROWS_CLOSED_TOTAL: &str = "scd_rows_closed_total";

pub const SCD_ROWS_UPDATED_IN_PLACE_TOTAL: &str = "scd_rows_updated_in_place_total";

/// Counter for apply attempts that were retried.
pub const SCD_KEY_APPLY_RETRIES_TOTAL: &str = "scd_key_apply_retries_total";

/// Counter for keys whose apply failed for good, labeled by error kind.
pub const SCD_KEY_APPLY_FAILURES_TOTAL: &str = "scd_key_apply_failures_total";

pub const SCD_KEYS_QUARANTINED_TOTAL: &str = "scd_keys_quarantined_total";

/// Histogram for the time spent applying one key, including retries.
pub const SCD_KEY_APPLY_DURATION_SECONDS: &str = "scd_key_apply_duration_seconds";

/// Histogram for the time spent processing a batch.
pub const SCD_BATCH_DURATION_SECONDS: &str = "scd_batch_duration_seconds";

/// Registers descriptions of the metrics emitted by the engine. Safe to call multiple times.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            SCD_RECORDS_RECEIVED_TOTAL,
            Unit::Count,
            "Change records received by the batch coordinator"
        );
        describe_counter!(
            SCD_RECORDS_MALFORMED_TOTAL,
            Unit::Count,
            "Change records rejected during normalization"
        );
        describe_counter!(
            SCD_RECORDS_NOOP_TOTAL,
            Unit::Count,
            "Change records that did not modify the history"
        );
        describe_counter!(SCD_ROWS_OPENED_TOTAL, Unit::Count, "Historized rows opened");
        describe_counter!(SCD_ROWS_CLOSED_TOTAL, Unit::Count, "Historized rows closed");
        describe_counter!(
            SCD_ROWS_UPDATED_IN_PLACE_TOTAL,
            Unit::Count,
            "Current rows refreshed without opening a new interval"
        );
        describe_counter!(
            SCD_KEY_APPLY_RETRIES_TOTAL,
            Unit::Count,
            "Retried key apply attempts"
        );
        describe_counter!(
            SCD_KEY_APPLY_FAILURES_TOTAL,
            Unit::Count,
            "Keys whose changes could not be applied"
        );
        describe_counter!(
            SCD_KEYS_QUARANTINED_TOTAL,
            Unit::Count,
            "Keys quarantined because of corrupt history"
        );
        describe_histogram!(
            SCD_KEY_APPLY_DURATION_SECONDS,
            Unit::Seconds,
            "Time spent reconciling and committing one key"
        );
        describe_histogram!(
            SCD_BATCH_DURATION_SECONDS,
            Unit::Seconds,
            "Time spent processing one batch"
        );
    });
}
