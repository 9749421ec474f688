use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, ScdResult};

/// Fails before the table commit of a key.
pub const APPLY_BEFORE_COMMIT: &str = "apply.before_commit";
/// Fails after the table commit of a key succeeded, losing its acknowledgement.
pub const APPLY_AFTER_COMMIT: &str = "apply.after_commit";
/// Fails before the history of a key is read.
pub const KEY_WORKER_BEFORE_READ: &str = "key_worker.before_read";

/// Error returned by a fail point, selected by the parameter of its `return` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedError {
    NoRetry,
    TimedRetry,
    WriteFailed,
    ReadFailed,
    Concurrent,
}

impl InjectedError {
    pub fn parameter(self) -> &'static str {
        match self {
            InjectedError::NoRetry => "no_retry",
            InjectedError::TimedRetry => "timed_retry",
            InjectedError::WriteFailed => "write_failed",
            InjectedError::ReadFailed => "read_failed",
            InjectedError::Concurrent => "concurrent",
        }
    }

    /// Unknown or missing parameters fall back to [`InjectedError::NoRetry`].
    pub fn from_parameter(parameter: Option<&str>) -> InjectedError {
        match parameter {
            Some("timed_retry") => InjectedError::TimedRetry,
            Some("write_failed") => InjectedError::WriteFailed,
            Some("read_failed") => InjectedError::ReadFailed,
            Some("concurrent") => InjectedError::Concurrent,
            _ => InjectedError::NoRetry,
        }
    }

    pub fn kind(self) -> ErrorKind {
        match self {
            InjectedError::NoRetry => ErrorKind::WithNoRetry,
            InjectedError::TimedRetry => ErrorKind::WithTimedRetry,
            InjectedError::WriteFailed => ErrorKind::StorageWriteFailed,
            InjectedError::ReadFailed => ErrorKind::StorageReadFailed,
            InjectedError::Concurrent => ErrorKind::ConcurrentModification,
        }
    }
}

pub fn scd_fail_point(name: &str) -> ScdResult<()> {
    fail_point!(name, |parameter| {
        let injected = InjectedError::from_parameter(parameter.as_deref());

        bail!(
            injected.kind(),
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
