use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Payload, RecordKey, Sequence};

/// End of a history interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveEnd {
    /// The interval is still open, the row is the current one.
    Open,
    /// The interval was closed by the record with this sequence.
    At(Sequence),
}

impl EffectiveEnd {
    pub fn is_open(&self) -> bool {
        matches!(self, EffectiveEnd::Open)
    }

    pub fn sequence(&self) -> Option<Sequence> {
        match self {
            EffectiveEnd::Open => None,
            EffectiveEnd::At(sequence) => Some(*sequence),
        }
    }
}

impl fmt::Display for EffectiveEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectiveEnd::Open => f.write_str("open"),
            EffectiveEnd::At(sequence) => write!(f, "{sequence}"),
        }
    }
}

/// A row of the historized target table, valid over `[effective_start, effective_end)`.
///
/// Rows are identified within a key by their `effective_start`. A row is mutated only to close
/// it, or to refresh untracked columns while it is current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorizedRow {
    pub key: RecordKey,
    pub payload: Payload,
    pub effective_start: Sequence,
    pub effective_end: EffectiveEnd,
    pub is_current: bool,
    /// Sequence of the latest record that refreshed the row in place. `None` when only the record
    /// that opened the row was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<Sequence>,
}

impl HistorizedRow {
    /// Creates a new current row opened at `effective_start`.
    pub fn open(key: RecordKey, payload: Payload, effective_start: Sequence) -> Self {
        Self {
            key,
            payload,
            effective_start,
            effective_end: EffectiveEnd::Open,
            is_current: true,
            last_sequence: None,
        }
    }

    /// Returns the sequence of the latest record applied to the row.
    pub fn applied_through(&self) -> Sequence {
        self.last_sequence.unwrap_or(self.effective_start)
    }

    /// Replaces the payload with the result of the record at `sequence`.
    pub fn refresh(&mut self, payload: Payload, sequence: Sequence) {
        self.payload = payload;
        self.last_sequence = (sequence != self.effective_start).then_some(sequence);
    }

    /// Closes the row at `effective_end`.
    pub fn close(&mut self, effective_end: Sequence) {
        self.effective_end = EffectiveEnd::At(effective_end);
        self.is_current = false;
    }
}

impl fmt::Display for HistorizedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {}){}",
            self.key,
            self.effective_start,
            self.effective_end,
            if self.is_current { " current" } else { "" }
        )
    }
}
