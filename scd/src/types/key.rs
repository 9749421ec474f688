use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Cell;

/// One component of a [`RecordKey`].
///
/// Only values with a well defined equality and total order can identify an entity, so nulls,
/// floats and nested JSON are not representable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Bool(bool),
    Int(i64),
    String(String),
}

impl KeyPart {
    /// Converts a cell into a key part, returning `None` for values that cannot identify an
    /// entity.
    pub fn from_cell(cell: &Cell) -> Option<KeyPart> {
        match cell {
            Cell::Bool(value) => Some(KeyPart::Bool(*value)),
            Cell::I64(value) => Some(KeyPart::Int(*value)),
            Cell::String(value) => Some(KeyPart::String(value.clone())),
            Cell::Null | Cell::F64(_) | Cell::Json(_) => None,
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Bool(value) => write!(f, "{value}"),
            KeyPart::Int(value) => write!(f, "{value}"),
            KeyPart::String(value) => f.write_str(value),
        }
    }
}

/// Business key of an entity, made of the values of the configured key columns in order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(Vec<KeyPart>);

impl RecordKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("|")?;
            }
            write!(f, "{part}")?;
        }
        Ok(())
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey(vec![KeyPart::String(value.to_string())])
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        RecordKey(vec![KeyPart::Int(value)])
    }
}
