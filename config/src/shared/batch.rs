use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batch execution configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of keys reconciled and applied at the same time.
    #[serde(default = "default_max_concurrent_keys")]
    pub max_concurrent_keys: usize,
    /// Deadline for a batch in milliseconds. Keys that have not started when it expires are
    /// abandoned without side effects.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl BatchConfig {
    /// Default number of keys processed concurrently.
    pub const DEFAULT_MAX_CONCURRENT_KEYS: usize = 16;

    /// Validates batch configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_keys == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_concurrent_keys".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.timeout_ms == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.timeout_ms".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_keys: default_max_concurrent_keys(),
            timeout_ms: None,
        }
    }
}

fn default_max_concurrent_keys() -> usize {
    BatchConfig::DEFAULT_MAX_CONCURRENT_KEYS
}
