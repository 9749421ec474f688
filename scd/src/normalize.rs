//! Validation and canonicalization of raw change records.

use config::shared::{MaterializationConfig, SequenceKind};
use std::collections::HashSet;

use crate::bail;
use crate::error::{ErrorKind, ScdError, ScdResult};
use crate::types::{
    Cell, ChangeRecord, KeyPart, Operation, Payload, RawChangeRecord, RecordKey, Sequence,
};

/// Turns [`RawChangeRecord`]s into [`ChangeRecord`]s.
///
/// A normalizer is scoped to one batch: when no sequence kind is configured, the kind of the
/// first well-formed record becomes the expected kind for the rest of the batch.
#[derive(Debug)]
pub struct Normalizer<'a> {
    config: &'a MaterializationConfig,
    sequence_kind: Option<SequenceKind>,
    reserved_columns: HashSet<&'a str>,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a MaterializationConfig) -> Self {
        let mut reserved_columns: HashSet<&str> =
            config.key_columns.iter().map(String::as_str).collect();
        reserved_columns.insert(config.sequence_by.as_str());
        if let Some(operation_column) = &config.operation_column {
            reserved_columns.insert(operation_column.as_str());
        }
        reserved_columns.extend(config.except_column_list.iter().map(String::as_str));

        Self {
            config,
            sequence_kind: config.sequence_kind,
            reserved_columns,
        }
    }

    /// Returns the sequence kind expected for the remaining records of the batch.
    pub fn sequence_kind(&self) -> Option<SequenceKind> {
        self.sequence_kind
    }

    /// Validates a raw record and builds its canonical form.
    ///
    /// Fails with [`ErrorKind::MalformedRecord`] when a key column or the sequence column is
    /// missing or holds a value of the wrong type, or when the declared operation is unknown.
    pub fn normalize(&mut self, raw: RawChangeRecord) -> ScdResult<ChangeRecord> {
        let RawChangeRecord {
            mut columns,
            tracked_columns,
        } = raw;

        let mut key_parts = Vec::with_capacity(self.config.key_columns.len());
        for key_column in &self.config.key_columns {
            let cell = columns
                .remove(key_column)
                .map(Cell::from_json)
                .unwrap_or(Cell::Null);

            if cell.is_null() {
                bail!(
                    ErrorKind::MalformedRecord,
                    "Key column is missing",
                    format!("column `{key_column}` is absent or null")
                );
            }

            let Some(part) = KeyPart::from_cell(&cell) else {
                bail!(
                    ErrorKind::MalformedRecord,
                    "Key column has a non comparable type",
                    format!("column `{key_column}` holds {cell}")
                );
            };
            key_parts.push(part);
        }
        let key = RecordKey::new(key_parts);

        let sequence_cell = columns
            .remove(&self.config.sequence_by)
            .map(Cell::from_json)
            .unwrap_or(Cell::Null);
        if sequence_cell.is_null() {
            bail!(
                ErrorKind::MalformedRecord,
                "Sequence column is missing",
                format!(
                    "column `{}` is absent or null for key {key}",
                    self.config.sequence_by
                )
            );
        }

        let Some(sequence) = Sequence::from_cell(&sequence_cell) else {
            bail!(
                ErrorKind::MalformedRecord,
                "Sequence value is neither an integer nor an RFC 3339 timestamp",
                format!("key {key} has sequence {sequence_cell}")
            );
        };

        match self.sequence_kind {
            Some(expected) if expected != sequence.kind() => {
                bail!(
                    ErrorKind::MalformedRecord,
                    "Sequence kind differs from the rest of the batch",
                    format!(
                        "key {key} has a {:?} sequence while {expected:?} is expected",
                        sequence.kind()
                    )
                );
            }
            Some(_) => {}
            None => self.sequence_kind = Some(sequence.kind()),
        }

        let operation = self.extract_operation(&mut columns, &key)?;

        let payload: Payload = columns
            .into_iter()
            .filter(|(column, _)| !self.reserved_columns.contains(column.as_str()))
            .map(|(column, value)| (column, Cell::from_json(value)))
            .collect();

        Ok(ChangeRecord {
            key,
            sequence,
            operation,
            payload,
            tracked_columns,
        })
    }

    /// Normalizes a whole batch, keeping arrival order and collecting rejected records.
    pub fn normalize_all<I>(&mut self, raw_records: I) -> (Vec<ChangeRecord>, Vec<ScdError>)
    where
        I: IntoIterator<Item = RawChangeRecord>,
    {
        let mut records = Vec::new();
        let mut rejected = Vec::new();

        for raw in raw_records {
            match self.normalize(raw) {
                Ok(record) => records.push(record),
                Err(err) => rejected.push(err),
            }
        }

        (records, rejected)
    }

    fn extract_operation(
        &self,
        columns: &mut serde_json::Map<String, serde_json::Value>,
        key: &RecordKey,
    ) -> ScdResult<Operation> {
        let Some(operation_column) = &self.config.operation_column else {
            return Ok(Operation::Upsert);
        };

        match columns.remove(operation_column) {
            None | Some(serde_json::Value::Null) => Ok(Operation::Upsert),
            Some(serde_json::Value::String(value)) => match Operation::parse(&value) {
                Some(operation) => Ok(operation),
                None => bail!(
                    ErrorKind::MalformedRecord,
                    "Unknown operation",
                    format!("key {key} declares operation `{value}`")
                ),
            },
            Some(other) => bail!(
                ErrorKind::MalformedRecord,
                "Operation column must hold a string",
                format!("key {key} declares operation {other}")
            ),
        }
    }
}
