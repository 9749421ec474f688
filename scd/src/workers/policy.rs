use crate::error::{ErrorKind, ScdError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The same plan can be committed again after a backoff.
    Timed,
    /// The history changed under the worker. The key must be read and reconciled again.
    Replan,
    /// The stored history is corrupt. The key is excluded from processing until released.
    Quarantine,
    /// The key should only be retried after manual intervention.
    Manual,
    /// The error should not be retried.
    NoRetry,
}

/// Policy describing how a [`ScdError`] should be handled by key workers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    /// Returns the retry directive for this policy.
    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }

    /// Returns `true` when the worker may try the key again on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.retry_directive,
            RetryDirective::Timed | RetryDirective::Replan
        )
    }
}

/// Builds an [`ErrorHandlingPolicy`] from a [`ScdError`].
pub fn build_error_handling_policy(error: &ScdError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient storage failures. A plan that was written although the write reported a
        // failure is recognized on the next attempt.
        ErrorKind::StorageWriteFailed | ErrorKind::StorageReadFailed => {
            ErrorHandlingPolicy::new(RetryDirective::Timed, None)
        }

        ErrorKind::ConcurrentModification => {
            ErrorHandlingPolicy::new(RetryDirective::Replan, None)
        }

        ErrorKind::InvariantViolation => ErrorHandlingPolicy::new(
            RetryDirective::Quarantine,
            Some("Repair the history of the key in the target table, then release the key."),
        ),

        ErrorKind::KeyQuarantined => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Release the key once its history has been repaired."),
        ),

        ErrorKind::MalformedRecord
        | ErrorKind::BatchAlreadyCommitted
        | ErrorKind::BatchInProgress => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, None)
        }

        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithTimedRetry => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Will automatically retry after the configured delay."),
        ),

        _ => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("There is no single prescribed solution for this error. Inspect the error detail and the history of the key."),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> ScdError {
        ScdError::from((kind, "test error"))
    }

    #[test]
    fn classifies_write_failure_as_timed_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::StorageWriteFailed));
        assert_eq!(policy.retry_directive(), RetryDirective::Timed);
        assert!(policy.is_retriable());
    }

    #[test]
    fn classifies_concurrent_modification_as_replan() {
        let policy = build_error_handling_policy(&err(ErrorKind::ConcurrentModification));
        assert_eq!(policy.retry_directive(), RetryDirective::Replan);
    }

    #[test]
    fn classifies_invariant_violation_as_quarantine() {
        let policy = build_error_handling_policy(&err(ErrorKind::InvariantViolation));
        assert_eq!(policy.retry_directive(), RetryDirective::Quarantine);
        assert!(!policy.is_retriable());
        assert!(policy.solution().is_some());
    }

    #[test]
    fn classifies_unknown_kind_as_manual_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::InvalidState));
        assert_eq!(policy.retry_directive(), RetryDirective::Manual);
    }
}
