use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// At least one key column must be configured.
    #[error("`key_columns` must contain at least one column")]
    KeyColumnsEmpty,
    /// The sequence column must be set.
    #[error("`sequence_by` cannot be empty")]
    SequenceByEmpty,
    /// A column was assigned two incompatible roles.
    #[error("column `{column}` cannot be used as {first} and {second}")]
    ConflictingColumnRole {
        column: String,
        first: &'static str,
        second: &'static str,
    },
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
