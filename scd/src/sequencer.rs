//! Grouping of a batch by key and ordering of each key's records by sequence.

use config::shared::TieBreakPolicy;
use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::types::{ChangeRecord, RecordKey};

/// The ordered records of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecords {
    pub key: RecordKey,
    /// Records in ascending sequence order.
    pub records: Vec<ChangeRecord>,
}

/// A batch grouped by key, with every group in sequence order.
///
/// Keys are yielded in ascending key order. The batch is consumed once.
#[derive(Debug, Default)]
pub struct SequencedBatch {
    groups: BTreeMap<RecordKey, Vec<ChangeRecord>>,
    superseded: usize,
}

impl SequencedBatch {
    pub fn key_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of records dropped by [`TieBreakPolicy::LastArrivalWins`].
    pub fn superseded(&self) -> usize {
        self.superseded
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl IntoIterator for SequencedBatch {
    type Item = KeyRecords;
    type IntoIter = SequencedBatchIter;

    fn into_iter(self) -> Self::IntoIter {
        SequencedBatchIter {
            inner: self.groups.into_iter(),
        }
    }
}

pub struct SequencedBatchIter {
    inner: btree_map::IntoIter<RecordKey, Vec<ChangeRecord>>,
}

impl Iterator for SequencedBatchIter {
    type Item = KeyRecords;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(key, records)| KeyRecords { key, records })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Orders records per key.
///
/// Records are sorted with a stable sort, so equal sequences keep their arrival order. With
/// [`TieBreakPolicy::LastArrivalWins`] only the last arrived record of each equal-sequence run
/// is kept. Both policies give the same result on every run over the same batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequencer {
    tie_break: TieBreakPolicy,
}

impl Sequencer {
    pub fn new(tie_break: TieBreakPolicy) -> Self {
        Self { tie_break }
    }

    /// Groups `records`, given in arrival order, by key and sorts each group.
    pub fn sequence<I>(&self, records: I) -> SequencedBatch
    where
        I: IntoIterator<Item = ChangeRecord>,
    {
        let mut groups: BTreeMap<RecordKey, Vec<ChangeRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.key.clone()).or_default().push(record);
        }

        let mut superseded = 0;
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.sequence.total_cmp(&b.sequence));

            if self.tie_break == TieBreakPolicy::LastArrivalWins {
                let before = group.len();
                keep_last_of_equal_sequences(group);
                superseded += before - group.len();
            }
        }

        SequencedBatch { groups, superseded }
    }
}

/// Keeps, for every run of equal sequences, only the last element of the run.
fn keep_last_of_equal_sequences(group: &mut Vec<ChangeRecord>) {
    let mut kept: Vec<ChangeRecord> = Vec::with_capacity(group.len());
    for record in group.drain(..) {
        match kept.last_mut() {
            Some(last) if last.sequence == record.sequence => *last = record,
            _ => kept.push(record),
        }
    }
    *group = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, Operation, Payload, Sequence};

    fn record(key: &str, sequence: i64, name: &str) -> ChangeRecord {
        let mut payload = Payload::new();
        payload.insert("name".to_string(), Cell::from(name));
        ChangeRecord::new(
            RecordKey::from(key),
            Sequence::Integer(sequence),
            Operation::Upsert,
            payload,
        )
    }

    fn names(records: &[ChangeRecord]) -> Vec<String> {
        records
            .iter()
            .map(|record| record.payload["name"].to_string())
            .collect()
    }

    #[test]
    fn groups_by_key_and_orders_by_sequence() {
        let batch = Sequencer::default().sequence(vec![
            record("U2", 5, "x"),
            record("U1", 3, "B"),
            record("U1", 1, "A"),
            record("U1", 2, "C"),
        ]);

        assert_eq!(batch.key_count(), 2);
        let groups: Vec<KeyRecords> = batch.into_iter().collect();
        assert_eq!(groups[0].key, RecordKey::from("U1"));
        assert_eq!(names(&groups[0].records), vec!["\"A\"", "\"C\"", "\"B\""]);
        assert_eq!(groups[1].key, RecordKey::from("U2"));
    }

    #[test]
    fn equal_sequences_keep_arrival_order() {
        let batch = Sequencer::new(TieBreakPolicy::ArrivalOrder).sequence(vec![
            record("U1", 2, "second"),
            record("U1", 1, "first"),
            record("U1", 2, "third"),
        ]);

        let groups: Vec<KeyRecords> = batch.into_iter().collect();
        assert_eq!(
            names(&groups[0].records),
            vec!["\"first\"", "\"second\"", "\"third\""]
        );
    }

    #[test]
    fn last_arrival_wins_collapses_equal_sequences() {
        let batch = Sequencer::new(TieBreakPolicy::LastArrivalWins).sequence(vec![
            record("U1", 2, "early"),
            record("U1", 1, "first"),
            record("U1", 2, "late"),
        ]);

        assert_eq!(batch.superseded(), 1);
        let groups: Vec<KeyRecords> = batch.into_iter().collect();
        assert_eq!(names(&groups[0].records), vec!["\"first\"", "\"late\""]);
    }
}
