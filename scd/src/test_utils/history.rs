use std::collections::BTreeMap;

use crate::reconcile::validate_history;
use crate::types::{EffectiveEnd, HistorizedRow, Payload, RecordKey, Sequence};

/// Asserts that every key of `rows` satisfies the history invariants.
pub fn assert_history_invariants(rows: &BTreeMap<RecordKey, Vec<HistorizedRow>>) {
    for (key, history) in rows {
        if let Err(err) = validate_history(key, history) {
            panic!("history of key {key} is invalid: {err}\n{}", format_rows(history));
        }

        let current = history.iter().filter(|row| row.is_current).count();
        assert!(current <= 1, "key {key} has {current} current rows");
    }
}

/// Returns the intervals and payloads of `rows` ordered by effective start.
pub fn timeline(rows: &[HistorizedRow]) -> Vec<(Sequence, EffectiveEnd, Payload)> {
    let mut rows: Vec<&HistorizedRow> = rows.iter().collect();
    rows.sort_by(|a, b| a.effective_start.total_cmp(&b.effective_start));

    rows.into_iter()
        .map(|row| (row.effective_start, row.effective_end, row.payload.clone()))
        .collect()
}

/// Returns the current row of `rows`, if any.
pub fn current_row(rows: &[HistorizedRow]) -> Option<&HistorizedRow> {
    rows.iter().find(|row| row.is_current)
}

fn format_rows(rows: &[HistorizedRow]) -> String {
    rows.iter()
        .map(|row| format!("  {row}"))
        .collect::<Vec<_>>()
        .join("\n")
}
