//! Computation of the mutations that bring the history of a key up to date with its new records.
//!
//! The reconciler is pure: it reads the stored rows of a key and the key's records in sequence
//! order and returns a [`MutationPlan`]. The same inputs always produce the same plan, which is
//! what makes re-processing a batch idempotent.

use config::shared::MaterializationConfig;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::bail;
use crate::error::{ErrorKind, ScdResult};
use crate::types::{
    Cell, ChangeRecord, EffectiveEnd, HistorizedRow, Mutation, MutationPlan, NoOpReason, Payload,
    Precondition, RecordKey, Sequence,
};

/// Where the current row of a key lives while a plan is being built.
#[derive(Debug)]
enum CurrentRow {
    /// The current row is stored in the table. `applied` is the latest sequence the table already
    /// applied to it and `in_place` points to the plan's pending [`Mutation::UpdateInPlace`] for
    /// it, if any.
    Stored {
        start: Sequence,
        applied: Sequence,
        payload: Payload,
        in_place: Option<usize>,
    },
    /// The current row was opened by this plan, at the given mutation index.
    Pending { start: Sequence, index: usize },
}

/// Diffs new change records against the stored history of a key.
#[derive(Debug, Clone)]
pub struct HistoryReconciler {
    exclusions: BTreeSet<String>,
    hard_delete_support: bool,
}

impl HistoryReconciler {
    pub fn new(config: &MaterializationConfig) -> Self {
        Self {
            exclusions: config.track_history_except_column_list.clone(),
            hard_delete_support: config.hard_delete_support,
        }
    }

    /// Computes the plan for `key`.
    ///
    /// `history` holds every stored row of the key in any order and `records` the key's new
    /// records in ascending sequence order. Fails with [`ErrorKind::InvariantViolation`] when the
    /// stored history is corrupt; such history is never repaired here.
    pub fn reconcile(
        &self,
        key: &RecordKey,
        history: &[HistorizedRow],
        records: &[ChangeRecord],
    ) -> ScdResult<MutationPlan> {
        validate_history(key, history)?;

        let precondition = Precondition::from_history(history);
        let mut plan = MutationPlan::new(key.clone(), precondition);

        let mut current = history
            .iter()
            .find(|row| row.is_current)
            .map(|row| CurrentRow::Stored {
                start: row.effective_start,
                applied: row.applied_through(),
                payload: row.payload.clone(),
                in_place: None,
            });
        let mut latest_end = precondition.latest_end;

        for record in records {
            match current.take() {
                Some(row) => {
                    current = self.apply_to_current(&mut plan, row, record, &mut latest_end);
                }
                None => {
                    current = self.apply_to_tombstone(&mut plan, record, latest_end);
                }
            }
        }

        Ok(plan)
    }

    /// Applies a record to a key that has a current row and returns the new current row.
    fn apply_to_current(
        &self,
        plan: &mut MutationPlan,
        row: CurrentRow,
        record: &ChangeRecord,
        latest_end: &mut Option<Sequence>,
    ) -> Option<CurrentRow> {
        let start = match &row {
            CurrentRow::Stored { start, .. } | CurrentRow::Pending { start, .. } => *start,
        };

        // Covers redelivered records that only refreshed the stored row in place.
        if let CurrentRow::Stored { applied, .. } = &row {
            if matches!(
                record.sequence.compare(applied),
                Some(Ordering::Less | Ordering::Equal)
            ) {
                push_noop(plan, record, NoOpReason::Stale);
                return Some(row);
            }
        }

        match record.sequence.compare(&start) {
            None => {
                push_noop(plan, record, NoOpReason::IncomparableSequence);
                Some(row)
            }
            Some(Ordering::Less) => {
                push_noop(plan, record, NoOpReason::Stale);
                Some(row)
            }
            Some(Ordering::Equal) => match row {
                // A record with the same sequence as a row this plan just opened amends that row
                // rather than opening an empty interval.
                CurrentRow::Pending { index, .. } => self.amend_pending(plan, index, record, start),
                CurrentRow::Stored { .. } => {
                    push_noop(plan, record, NoOpReason::Stale);
                    Some(row)
                }
            },
            Some(Ordering::Greater) if record.operation.is_delete() => {
                if !self.hard_delete_support {
                    push_noop(plan, record, NoOpReason::DeleteIgnored);
                    return Some(row);
                }

                close_current(plan, &row, record.sequence);
                *latest_end = Some(record.sequence);
                None
            }
            Some(Ordering::Greater) => {
                let current_payload = current_payload(plan, &row);
                let merged = overlay(current_payload, &record.payload);

                if self.tracked_change(current_payload, record) {
                    close_current(plan, &row, record.sequence);
                    *latest_end = Some(record.sequence);
                    Some(open_row(plan, record, merged))
                } else if merged != *current_payload {
                    Some(update_in_place(plan, row, merged, record.sequence))
                } else {
                    push_noop(plan, record, NoOpReason::Unchanged);
                    Some(row)
                }
            }
        }
    }

    /// Applies a record to a key without a current row and returns the new current row.
    fn apply_to_tombstone(
        &self,
        plan: &mut MutationPlan,
        record: &ChangeRecord,
        latest_end: Option<Sequence>,
    ) -> Option<CurrentRow> {
        if let Some(latest_end) = latest_end {
            match record.sequence.compare(&latest_end) {
                None => {
                    push_noop(plan, record, NoOpReason::IncomparableSequence);
                    return None;
                }
                Some(Ordering::Less | Ordering::Equal) => {
                    push_noop(plan, record, NoOpReason::Stale);
                    return None;
                }
                Some(Ordering::Greater) => {}
            }
        }

        if record.operation.is_delete() {
            let reason = if self.hard_delete_support {
                NoOpReason::NothingToDelete
            } else {
                NoOpReason::DeleteIgnored
            };
            push_noop(plan, record, reason);
            return None;
        }

        Some(open_row(plan, record, record.payload.clone()))
    }

    /// Folds a record into the row opened by this plan at the same sequence.
    fn amend_pending(
        &self,
        plan: &mut MutationPlan,
        index: usize,
        record: &ChangeRecord,
        start: Sequence,
    ) -> Option<CurrentRow> {
        if record.operation.is_delete() {
            if !self.hard_delete_support {
                push_noop(plan, record, NoOpReason::DeleteIgnored);
                return Some(CurrentRow::Pending { start, index });
            }

            // The delete cancels the row opened at the same sequence. The previous row, if any,
            // was already closed at this sequence.
            plan.mutations.remove(index);
            return None;
        }

        let pending = CurrentRow::Pending { start, index };
        let current = current_payload(plan, &pending);
        let merged = overlay(current, &record.payload);
        if merged == *current {
            push_noop(plan, record, NoOpReason::Unchanged);
            return Some(pending);
        }

        Some(update_in_place(plan, pending, merged, record.sequence))
    }

    /// Returns `true` when the record changes a history tracked column of the current payload.
    fn tracked_change(&self, current: &Payload, record: &ChangeRecord) -> bool {
        record
            .payload
            .iter()
            .filter(|(column, _)| self.is_tracked(column, record))
            .any(|(column, value)| current.get(column).unwrap_or(&Cell::Null) != value)
    }

    fn is_tracked(&self, column: &str, record: &ChangeRecord) -> bool {
        match &record.tracked_columns {
            Some(tracked_columns) => tracked_columns.contains(column),
            None => !self.exclusions.contains(column),
        }
    }
}

/// Checks the stored rows of a key against the history invariants.
///
/// Rows must all belong to `key`, use one sequence kind, have non-empty intervals that do not
/// overlap, and at most one current row which is the latest interval.
pub fn validate_history(key: &RecordKey, history: &[HistorizedRow]) -> ScdResult<()> {
    let mut rows: Vec<&HistorizedRow> = history.iter().collect();
    rows.sort_by(|a, b| a.effective_start.total_cmp(&b.effective_start));

    let mut current_rows = 0;
    for (index, row) in rows.iter().enumerate() {
        if row.key != *key {
            bail!(
                ErrorKind::InvariantViolation,
                "Row belongs to another key",
                format!("row {row} was read for key {key}")
            );
        }

        if row.is_current != row.effective_end.is_open() {
            bail!(
                ErrorKind::InvariantViolation,
                "Row current flag does not match its interval end",
                format!("row {row} of key {key}")
            );
        }

        if row.is_current {
            current_rows += 1;
            if current_rows > 1 {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Key has more than one current row",
                    format!("key {key} has a second current row {row}")
                );
            }
            if index + 1 != rows.len() {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Current row is not the latest interval",
                    format!("key {key} has rows after current row {row}")
                );
            }
        }

        if let EffectiveEnd::At(end) = row.effective_end {
            if end.compare(&row.effective_start) != Some(Ordering::Greater) {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Row interval is empty or inverted",
                    format!("row {row} of key {key}")
                );
            }
        }

        if let Some(last) = row.last_sequence {
            let after_start = last.compare(&row.effective_start) == Some(Ordering::Greater);
            let within_end = match row.effective_end {
                EffectiveEnd::At(end) => last.compare(&end) != Some(Ordering::Greater),
                EffectiveEnd::Open => true,
            };
            if !after_start || !within_end {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Row was refreshed outside of its interval",
                    format!("row {row} of key {key} was refreshed at {last}")
                );
            }
        }

        if index > 0 {
            let previous = rows[index - 1];
            let previous_end = previous.effective_end.sequence();
            let overlaps = match previous_end {
                Some(previous_end) => {
                    row.effective_start.compare(&previous_end) == Some(Ordering::Less)
                        || row.effective_start.kind() != previous_end.kind()
                }
                None => true,
            };

            if overlaps {
                bail!(
                    ErrorKind::InvariantViolation,
                    "Row intervals overlap",
                    format!("rows {previous} and {row} of key {key}")
                );
            }
        }
    }

    Ok(())
}

fn push_noop(plan: &mut MutationPlan, record: &ChangeRecord, reason: NoOpReason) {
    plan.mutations.push(Mutation::NoOp {
        sequence: record.sequence,
        reason,
    });
}

/// Returns the payload of the current row as the plan sees it.
fn current_payload<'a>(plan: &'a MutationPlan, row: &'a CurrentRow) -> &'a Payload {
    match row {
        CurrentRow::Stored { payload, .. } => payload,
        CurrentRow::Pending { index, .. } => match &plan.mutations[*index] {
            Mutation::OpenRow { row } => &row.payload,
            // Pending indexes always point to an open row.
            _ => unreachable!("pending current row must point to an OpenRow mutation"),
        },
    }
}

/// Closes the current row at `end`, either in the plan or through a [`Mutation::CloseRow`].
fn close_current(plan: &mut MutationPlan, row: &CurrentRow, end: Sequence) {
    match row {
        CurrentRow::Stored { start, .. } => plan.mutations.push(Mutation::CloseRow {
            effective_start: *start,
            effective_end: end,
        }),
        CurrentRow::Pending { index, .. } => {
            if let Mutation::OpenRow { row } = &mut plan.mutations[*index] {
                row.close(end);
            }
        }
    }
}

fn open_row(plan: &mut MutationPlan, record: &ChangeRecord, payload: Payload) -> CurrentRow {
    let row = HistorizedRow::open(record.key.clone(), payload, record.sequence);
    plan.mutations.push(Mutation::OpenRow { row });

    CurrentRow::Pending {
        start: record.sequence,
        index: plan.mutations.len() - 1,
    }
}

/// Refreshes untracked columns of the current row with the record at `sequence`, reusing a
/// pending mutation when there is one.
fn update_in_place(
    plan: &mut MutationPlan,
    row: CurrentRow,
    merged: Payload,
    sequence: Sequence,
) -> CurrentRow {
    match row {
        CurrentRow::Pending { start, index } => {
            if let Mutation::OpenRow { row } = &mut plan.mutations[index] {
                row.refresh(merged, sequence);
            }
            CurrentRow::Pending { start, index }
        }
        CurrentRow::Stored {
            start,
            applied,
            in_place,
            ..
        } => {
            let update = Mutation::UpdateInPlace {
                effective_start: start,
                sequence,
                payload: merged.clone(),
            };
            let index = match in_place {
                Some(index) => {
                    plan.mutations[index] = update;
                    index
                }
                None => {
                    plan.mutations.push(update);
                    plan.mutations.len() - 1
                }
            };

            CurrentRow::Stored {
                start,
                applied,
                payload: merged,
                in_place: Some(index),
            }
        }
    }
}

/// Overlays `changes` on top of `base`. Columns missing from `changes` keep their value.
fn overlay(base: &Payload, changes: &Payload) -> Payload {
    let mut merged = base.clone();
    for (column, value) in changes {
        merged.insert(column.clone(), value.clone());
    }
    merged
}
