use config::shared::MaterializationConfig;
use serde_json::{Map, Value, json};

use crate::types::RawChangeRecord;

/// Key column of [`test_config`].
pub const KEY_COLUMN: &str = "user_id";
/// Sequence column of [`test_config`].
pub const SEQUENCE_COLUMN: &str = "updated_at";
/// Operation column of [`test_config`].
pub const OPERATION_COLUMN: &str = "op";

/// Returns a configuration for a `dim_user` table keyed by `user_id` and sequenced by
/// `updated_at`, with `last_login` excluded from history tracking and short retry delays.
pub fn test_config() -> MaterializationConfig {
    let mut config = MaterializationConfig::new(
        "dim_user",
        vec![KEY_COLUMN.to_string()],
        SEQUENCE_COLUMN,
    );
    config.operation_column = Some(OPERATION_COLUMN.to_string());
    config
        .track_history_except_column_list
        .insert("last_login".to_string());
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 10;

    config
}

/// Builds a raw record from a JSON object.
pub fn raw_record(value: Value) -> RawChangeRecord {
    match value {
        Value::Object(columns) => RawChangeRecord::new(columns),
        other => panic!("a raw record must be a JSON object, got {other}"),
    }
}

/// Builds an upsert of `key` at `sequence` with the given columns.
pub fn upsert(key: &str, sequence: i64, columns: &[(&str, &str)]) -> RawChangeRecord {
    let mut record = Map::new();
    record.insert(KEY_COLUMN.to_string(), json!(key));
    record.insert(SEQUENCE_COLUMN.to_string(), json!(sequence));
    for (column, value) in columns {
        record.insert(column.to_string(), json!(value));
    }

    RawChangeRecord::new(record)
}

/// Builds a delete of `key` at `sequence`.
pub fn delete(key: &str, sequence: i64) -> RawChangeRecord {
    raw_record(json!({
        KEY_COLUMN: key,
        SEQUENCE_COLUMN: sequence,
        OPERATION_COLUMN: "delete",
    }))
}
