use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{Payload, RecordKey, Sequence};

/// Change type declared by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    /// Insert-or-update intent, used when the source does not declare a change type.
    Upsert,
    Delete,
}

impl Operation {
    /// Parses an operation name case-insensitively.
    pub fn parse(value: &str) -> Option<Operation> {
        match value.trim().to_ascii_lowercase().as_str() {
            "insert" | "i" | "c" | "create" => Some(Operation::Insert),
            "update" | "u" => Some(Operation::Update),
            "upsert" => Some(Operation::Upsert),
            "delete" | "d" => Some(Operation::Delete),
            _ => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A record as delivered by the ingestion connector, before validation.
///
/// Columns are kept as raw JSON values. The optional `_tracked_columns` field restricts history
/// tracking to the listed columns for this record only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChangeRecord {
    #[serde(flatten)]
    pub columns: serde_json::Map<String, serde_json::Value>,
    #[serde(
        rename = "_tracked_columns",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tracked_columns: Option<BTreeSet<String>>,
}

impl RawChangeRecord {
    pub fn new(columns: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            columns,
            tracked_columns: None,
        }
    }
}

/// A validated change of one entity.
///
/// Immutable once produced by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub key: RecordKey,
    pub sequence: Sequence,
    pub operation: Operation,
    pub payload: Payload,
    /// When set, only these columns open new history intervals for this record.
    pub tracked_columns: Option<BTreeSet<String>>,
}

impl ChangeRecord {
    pub fn new(
        key: RecordKey,
        sequence: Sequence,
        operation: Operation,
        payload: Payload,
    ) -> Self {
        Self {
            key,
            sequence,
            operation,
            payload,
            tracked_columns: None,
        }
    }

    pub fn with_tracked_columns(mut self, tracked_columns: BTreeSet<String>) -> Self {
        self.tracked_columns = Some(tracked_columns);
        self
    }
}
