use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::load::Config;
use crate::shared::{BatchConfig, RetryConfig, ValidationError};

/// Policy used to order records of the same key that carry an equal sequence value.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Keep every record and order equal sequences by their position in the batch.
    #[default]
    ArrivalOrder,
    /// Keep only the record that arrived last among those with an equal sequence.
    LastArrivalWins,
}

/// Kind of value carried by the sequence column.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    /// Integer sequence such as a log position or version counter.
    Integer,
    /// RFC 3339 timestamp such as an `updated_at` column.
    Timestamp,
}

/// Configuration of a change-feed to SCD2 materialization.
///
/// Maps source columns onto the roles the engine needs (key, sequence, operation) and holds the
/// history tracking options of the target table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MaterializationConfig {
    /// Name of the historized target table, used for log and metric labels.
    pub target: String,
    /// Source columns identifying an entity. Composite keys list several columns.
    pub key_columns: Vec<String>,
    /// Source column carrying the sequence value used to order changes.
    pub sequence_by: String,
    /// Expected sequence kind. When absent, the kind is inferred from the first well-formed
    /// record of each batch.
    #[serde(default)]
    pub sequence_kind: Option<SequenceKind>,
    /// Source column carrying the change type (`insert`, `update`, `upsert` or `delete`).
    #[serde(default)]
    pub operation_column: Option<String>,
    /// Source columns that are dropped from the payload and never stored.
    #[serde(default)]
    pub except_column_list: BTreeSet<String>,
    /// Columns whose changes update the current row in place instead of opening a new interval.
    #[serde(default, alias = "tracked_column_exclusions")]
    pub track_history_except_column_list: BTreeSet<String>,
    /// Whether delete records close the current row. When false they are ignored.
    #[serde(default = "default_hard_delete_support")]
    pub hard_delete_support: bool,
    /// Whether a batch identifier can be processed at most once.
    #[serde(default)]
    pub once_only: bool,
    /// Ordering policy for equal sequence values within a key.
    #[serde(default)]
    pub tie_break: TieBreakPolicy,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl MaterializationConfig {
    /// Creates a configuration with default options for the given column roles.
    pub fn new(
        target: impl Into<String>,
        key_columns: Vec<String>,
        sequence_by: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            key_columns,
            sequence_by: sequence_by.into(),
            sequence_kind: None,
            operation_column: None,
            except_column_list: BTreeSet::new(),
            track_history_except_column_list: BTreeSet::new(),
            hard_delete_support: default_hard_delete_support(),
            once_only: false,
            tie_break: TieBreakPolicy::default(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// Checks that key and sequence columns are set and that no column plays two roles.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key_columns.is_empty() || self.key_columns.iter().any(|c| c.is_empty()) {
            return Err(ValidationError::KeyColumnsEmpty);
        }

        if self.sequence_by.is_empty() {
            return Err(ValidationError::SequenceByEmpty);
        }

        for column in &self.key_columns {
            if *column == self.sequence_by {
                return Err(conflict(column, "key column", "sequence column"));
            }
            if self.except_column_list.contains(column) {
                return Err(conflict(column, "key column", "excluded column"));
            }
            if self.operation_column.as_ref() == Some(column) {
                return Err(conflict(column, "key column", "operation column"));
            }
        }

        if self.operation_column.as_ref() == Some(&self.sequence_by) {
            return Err(conflict(
                &self.sequence_by,
                "sequence column",
                "operation column",
            ));
        }

        if self.except_column_list.contains(&self.sequence_by) {
            return Err(conflict(
                &self.sequence_by,
                "sequence column",
                "excluded column",
            ));
        }

        self.batch.validate()?;
        self.retry.validate()?;

        Ok(())
    }
}

impl Config for MaterializationConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[
        "key_columns",
        "except_column_list",
        "track_history_except_column_list",
    ];

    fn validate(&self) -> Result<(), ValidationError> {
        MaterializationConfig::validate(self)
    }
}

fn conflict(column: &str, first: &'static str, second: &'static str) -> ValidationError {
    ValidationError::ConflictingColumnRole {
        column: column.to_string(),
        first,
        second,
    }
}

fn default_hard_delete_support() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_config() -> MaterializationConfig {
        MaterializationConfig::new("dim_user", vec!["user_id".to_string()], "updated_at")
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(users_config().validate(), Ok(()));
    }

    #[test]
    fn rejects_missing_key_columns() {
        let mut config = users_config();
        config.key_columns.clear();

        assert_eq!(config.validate(), Err(ValidationError::KeyColumnsEmpty));
    }

    #[test]
    fn rejects_sequence_column_used_as_key() {
        let mut config = users_config();
        config.key_columns.push("updated_at".to_string());

        assert!(matches!(
            config.validate(),
            Err(ValidationError::ConflictingColumnRole { .. })
        ));
    }

    #[test]
    fn deserializes_with_defaults_and_alias() {
        let config: MaterializationConfig = serde_json::from_str(
            r#"{
                "target": "dim_user",
                "key_columns": ["user_id"],
                "sequence_by": "updated_at",
                "tracked_column_exclusions": ["last_login"],
                "tie_break": "last_arrival_wins"
            }"#,
        )
        .unwrap();

        assert!(config.hard_delete_support);
        assert!(!config.once_only);
        assert_eq!(config.tie_break, TieBreakPolicy::LastArrivalWins);
        assert!(config.track_history_except_column_list.contains("last_login"));
        assert_eq!(config.batch, BatchConfig::default());
    }
}
