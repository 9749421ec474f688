use chrono::{DateTime, Utc};
use config::shared::SequenceKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::types::Cell;

/// Value of the sequence column used to order the changes of a key.
///
/// Sequences are only comparable with sequences of the same kind, see
/// [`Sequence::partial_cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sequence {
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl Sequence {
    /// Parses a sequence from a cell.
    ///
    /// Integers become [`Sequence::Integer`] and RFC 3339 strings become
    /// [`Sequence::Timestamp`]. Any other value yields `None`.
    pub fn from_cell(cell: &Cell) -> Option<Sequence> {
        match cell {
            Cell::I64(value) => Some(Sequence::Integer(*value)),
            Cell::String(value) => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|timestamp| Sequence::Timestamp(timestamp.with_timezone(&Utc))),
            _ => None,
        }
    }

    pub fn kind(&self) -> SequenceKind {
        match self {
            Sequence::Integer(_) => SequenceKind::Integer,
            Sequence::Timestamp(_) => SequenceKind::Timestamp,
        }
    }

    /// Compares two sequences of the same kind.
    ///
    /// Returns `None` when the kinds differ.
    pub fn compare(&self, other: &Sequence) -> Option<Ordering> {
        self.partial_cmp(other)
    }
}

impl Sequence {
    /// Total order used for sorting, placing integer sequences before timestamps.
    ///
    /// Only meaningful between sequences of the same kind, which is what the normalizer
    /// guarantees within a batch.
    pub fn total_cmp(&self, other: &Sequence) -> Ordering {
        match (self, other) {
            (Sequence::Integer(a), Sequence::Integer(b)) => a.cmp(b),
            (Sequence::Timestamp(a), Sequence::Timestamp(b)) => a.cmp(b),
            (Sequence::Integer(_), Sequence::Timestamp(_)) => Ordering::Less,
            (Sequence::Timestamp(_), Sequence::Integer(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Sequence::Integer(a), Sequence::Integer(b)) => Some(a.cmp(b)),
            (Sequence::Timestamp(a), Sequence::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sequence::Integer(value) => write!(f, "{value}"),
            Sequence::Timestamp(value) => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

impl From<i64> for Sequence {
    fn from(value: i64) -> Self {
        Sequence::Integer(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_and_timestamp_cells() {
        assert_eq!(Sequence::from_cell(&Cell::I64(7)), Some(Sequence::Integer(7)));

        let timestamp = Sequence::from_cell(&Cell::from("2024-05-01T10:00:00+02:00")).unwrap();
        assert_eq!(timestamp.kind(), SequenceKind::Timestamp);
        assert_eq!(timestamp.to_string(), "2024-05-01T08:00:00+00:00");

        assert_eq!(Sequence::from_cell(&Cell::from("yesterday")), None);
        assert_eq!(Sequence::from_cell(&Cell::F64(1.5)), None);
        assert_eq!(Sequence::from_cell(&Cell::Null), None);
    }

    #[test]
    fn sequences_of_different_kinds_are_incomparable() {
        let integer = Sequence::Integer(1);
        let timestamp = Sequence::from_cell(&Cell::from("2024-01-01T00:00:00Z")).unwrap();

        assert_eq!(integer.compare(&timestamp), None);
        assert!(Sequence::Integer(1) < Sequence::Integer(2));
    }
}
