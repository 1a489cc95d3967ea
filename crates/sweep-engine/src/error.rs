use std::fmt;

use thiserror::Error;

use crate::remote::RemoteError;

/// Engine-level classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credential rejected; abort the whole operation.
    Fatal,
    /// Not a member of the stream; abandon the stream only.
    SkipStream,
    /// Mutation target already absent; counts as success.
    AlreadySatisfied,
    /// Throttled; retried with exponential backoff.
    RateLimited,
    /// Network, timeout or unknown failure; retried with a fixed delay.
    Transient,
    /// Retries exhausted.
    StreamFailure,
    /// Caller cancellation or operation deadline.
    Cancelled,
}

impl ErrorClass {
    pub fn of(error: &RemoteError) -> Self {
        match error {
            RemoteError::Unauthorized { .. } => Self::Fatal,
            RemoteError::Inaccessible { .. } => Self::SkipStream,
            RemoteError::Gone { .. } => Self::AlreadySatisfied,
            RemoteError::RateLimited { .. } => Self::RateLimited,
            RemoteError::Transport { .. } | RemoteError::Rejected { .. } => Self::Transient,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::SkipStream => "skip_stream",
            Self::AlreadySatisfied => "already_satisfied",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::StreamFailure => "stream_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote call failure after the rate limiter has applied its retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} ended as {class} after {attempts} attempt(s): {message}")]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub operation: String,
    pub attempts: usize,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(
        class: ErrorClass,
        operation: &str,
        attempts: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            class,
            operation: operation.to_string(),
            attempts,
            message: message.into(),
        }
    }

    pub fn cancelled(operation: &str, attempts: usize) -> Self {
        Self::new(
            ErrorClass::Cancelled,
            operation,
            attempts,
            "operation cancelled",
        )
    }

    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::Fatal
    }
}

/// Hard failures surfaced to callers of the engine's top-level operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("operation aborted, credential rejected during {operation}: {message}")]
    Fatal { operation: String, message: String },
    #[error("unrecoverable remote failure: {0}")]
    Remote(ClassifiedError),
}

impl From<ClassifiedError> for EngineError {
    fn from(error: ClassifiedError) -> Self {
        if error.is_fatal() {
            Self::Fatal {
                operation: error.operation,
                message: error.message,
            }
        } else {
            Self::Remote(error)
        }
    }
}
