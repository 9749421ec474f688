//! Error types and result definitions for materialization operations.
//!
//! [`ScdError`] carries a classification ([`ErrorKind`]), a static description, optional dynamic
//! detail and source, and the callsite where it was created. Failures of several keys are not
//! aggregated here, the batch summary lists them per key.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for engine operations.
pub type ScdResult<T> = Result<T, ScdError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the engine.
#[derive(Debug, Clone)]
pub struct ScdError {
    payload: Box<ErrorPayload>,
}

/// Categories of errors raised while materializing a change feed.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Input errors
    MalformedRecord,

    // Storage errors
    StorageWriteFailed,
    StorageReadFailed,
    ConcurrentModification,

    // History errors
    InvariantViolation,
    KeyQuarantined,

    // Batch errors
    BatchAlreadyCommitted,
    BatchInProgress,
    KeyWorkerPanic,

    // Configuration errors
    ConfigError,

    // Serialization errors
    DeserializationError,
    IoError,

    InvalidState,

    // Used by fault injection tests.
    #[cfg(feature = "failpoints")]
    WithNoRetry,
    #[cfg(feature = "failpoints")]
    WithTimedRetry,
}

impl ScdError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the static description.
    pub fn description(&self) -> &str {
        &self.payload.description
    }

    /// Returns the dynamic detail if available.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the backtrace captured when this error was created.
    pub fn backtrace(&self) -> &Backtrace {
        &self.payload.backtrace
    }

    /// Returns the callsite where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        ScdError {
            payload: Box::new(ErrorPayload {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for ScdError {
    fn eq(&self, other: &ScdError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl fmt::Display for ScdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = &self.payload;
        write!(f, "[{:?}] {}", payload.kind, payload.description)?;
        if let Some(detail) = &payload.detail {
            write!(f, ": {detail}")?;
        }
        write!(
            f,
            " @ {}:{}",
            payload.location.file(),
            payload.location.line()
        )
    }
}

impl error::Error for ScdError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for ScdError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> ScdError {
        ScdError::from_components(kind, Cow::Borrowed(desc), None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for ScdError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> ScdError {
        ScdError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()))
    }
}

impl From<std::io::Error> for ScdError {
    #[track_caller]
    fn from(err: std::io::Error) -> ScdError {
        let detail = err.to_string();
        ScdError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}

impl From<serde_json::Error> for ScdError {
    #[track_caller]
    fn from(err: serde_json::Error) -> ScdError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        ScdError::from_components(kind, Cow::Borrowed(description), Some(Cow::Owned(detail)))
            .with_source(err)
    }
}

impl From<config::shared::ValidationError> for ScdError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> ScdError {
        let detail = err.to_string();
        ScdError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid materialization configuration"),
            Some(Cow::Owned(detail)),
        )
        .with_source(err)
    }
}
