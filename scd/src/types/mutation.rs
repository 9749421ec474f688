use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{EffectiveEnd, HistorizedRow, Payload, RecordKey, Sequence};

/// Why a record produced no change to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    /// The record is not newer than the existing history of its key.
    Stale,
    /// The record carries no change to the current row.
    Unchanged,
    /// A delete arrived while hard deletes are disabled.
    DeleteIgnored,
    /// A delete arrived for a key without a current row.
    NothingToDelete,
    /// The record sequence cannot be compared with the sequences already stored for its key.
    IncomparableSequence,
}

impl NoOpReason {
    pub const ALL: [NoOpReason; 5] = [
        NoOpReason::Stale,
        NoOpReason::Unchanged,
        NoOpReason::DeleteIgnored,
        NoOpReason::NothingToDelete,
        NoOpReason::IncomparableSequence,
    ];

    /// Returns the snake case name of the reason, as used in metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            NoOpReason::Stale => "stale",
            NoOpReason::Unchanged => "unchanged",
            NoOpReason::DeleteIgnored => "delete_ignored",
            NoOpReason::NothingToDelete => "nothing_to_delete",
            NoOpReason::IncomparableSequence => "incomparable_sequence",
        }
    }
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            NoOpReason::Stale => "stale",
            NoOpReason::Unchanged => "unchanged",
            NoOpReason::DeleteIgnored => "delete ignored",
            NoOpReason::NothingToDelete => "nothing to delete",
            NoOpReason::IncomparableSequence => "incomparable sequence",
        };
        f.write_str(reason)
    }
}

/// A single change to the historized rows of one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Mutation {
    /// Appends a row. The row is current unless the same plan already superseded it, in which
    /// case it is appended closed.
    OpenRow { row: HistorizedRow },
    /// Closes the current row identified by `effective_start`.
    CloseRow {
        effective_start: Sequence,
        effective_end: Sequence,
    },
    /// Replaces the payload of the current row identified by `effective_start` without opening a
    /// new interval. `sequence` is the record the new payload comes from.
    UpdateInPlace {
        effective_start: Sequence,
        sequence: Sequence,
        payload: Payload,
    },
    /// Records that a change record did not affect the history.
    NoOp {
        sequence: Sequence,
        reason: NoOpReason,
    },
}

impl Mutation {
    /// Returns `true` for mutations that write to the target table.
    pub fn is_write(&self) -> bool {
        !matches!(self, Mutation::NoOp { .. })
    }
}

/// State of a key observed when a plan was computed.
///
/// Used as the expected value of the conditional write performed by the table, so that two
/// writers that planned against the same current row cannot both close it, and a writer cannot
/// overwrite an in-place refresh it did not see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Precondition {
    /// `effective_start` of the current row, if any.
    pub current_start: Option<Sequence>,
    /// Sequence of the latest record applied to the current row, if any.
    pub current_applied: Option<Sequence>,
    /// `effective_end` of the most recent closed row, if any.
    pub latest_end: Option<Sequence>,
}

impl Precondition {
    /// Derives the precondition from the rows of a key.
    pub fn from_history(rows: &[HistorizedRow]) -> Self {
        let current = rows.iter().find(|row| row.is_current);

        let latest_end = rows
            .iter()
            .filter_map(|row| row.effective_end.sequence())
            .max_by(|a, b| a.total_cmp(b));

        Self {
            current_start: current.map(|row| row.effective_start),
            current_applied: current.map(HistorizedRow::applied_through),
            latest_end,
        }
    }
}

/// Ordered list of mutations computed for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPlan {
    pub key: RecordKey,
    pub precondition: Precondition,
    pub mutations: Vec<Mutation>,
}

impl MutationPlan {
    pub fn new(key: RecordKey, precondition: Precondition) -> Self {
        Self {
            key,
            precondition,
            mutations: Vec::new(),
        }
    }

    /// Returns `true` when the plan does not write anything.
    pub fn is_noop(&self) -> bool {
        !self.mutations.iter().any(Mutation::is_write)
    }

    /// Returns the mutations that write to the target table.
    pub fn writes(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter().filter(|mutation| mutation.is_write())
    }

    pub fn rows_opened(&self) -> usize {
        self.count(|m| matches!(m, Mutation::OpenRow { .. }))
    }

    /// Number of rows closed by the plan, including rows opened and superseded within it.
    pub fn rows_closed(&self) -> usize {
        self.count(|m| {
            matches!(m, Mutation::CloseRow { .. })
                || matches!(m, Mutation::OpenRow { row } if !row.is_current)
        })
    }

    pub fn rows_updated_in_place(&self) -> usize {
        self.count(|m| matches!(m, Mutation::UpdateInPlace { .. }))
    }

    /// Number of records discarded for the given reason.
    pub fn noops(&self, reason: NoOpReason) -> usize {
        self.count(|m| matches!(m, Mutation::NoOp { reason: r, .. } if *r == reason))
    }

    /// Checks whether the writes of this plan are already present in `rows`.
    ///
    /// Used to recognize a plan that was committed although its acknowledgement was lost, so that
    /// retrying it does not write twice.
    pub fn is_reflected_in(&self, rows: &[HistorizedRow]) -> bool {
        if self.is_noop() {
            return false;
        }

        let row_at = |start: &Sequence| rows.iter().find(|row| row.effective_start == *start);

        self.writes().all(|mutation| match mutation {
            Mutation::OpenRow { row } => row_at(&row.effective_start).is_some_and(|stored| {
                stored.effective_end == row.effective_end
                    || (row.is_current && !stored.effective_end.is_open())
            }),
            Mutation::CloseRow {
                effective_start,
                effective_end,
            } => row_at(effective_start)
                .is_some_and(|stored| stored.effective_end == EffectiveEnd::At(*effective_end)),
            Mutation::UpdateInPlace {
                effective_start,
                sequence,
                payload,
            } => row_at(effective_start).is_some_and(|stored| {
                (stored.payload == *payload && stored.applied_through() == *sequence)
                    || !stored.effective_end.is_open()
            }),
            Mutation::NoOp { .. } => true,
        })
    }

    fn count(&self, predicate: impl Fn(&Mutation) -> bool) -> usize {
        self.mutations.iter().filter(|m| predicate(m)).count()
    }
}
