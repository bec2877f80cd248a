//! Result and error types for convergent execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::ErrorFormatter;
use crate::meta::Meta;

/// Result type for convergence operations
pub type ConvergeResult<T> = Result<T, ConvergeError>;

/// Errors that can surface from building or executing a convergence
#[derive(Debug, Clone, Error)]
pub enum ConvergeError {
    /// The predicate never became (or stayed) true within its budget
    #[error("convergence exceeded {timeout_ms}ms after {runs} run(s){}", caused_by(.cause))]
    TimeoutExceeded {
        /// Budget in milliseconds
        timeout_ms: u64,
        /// Number of predicate invocations
        runs: u32,
        /// Last observed failure
        cause: Option<Box<ConvergeError>>,
    },

    /// The predicate passed, but only once the deadline had elapsed
    #[error("converged after {elapsed_ms}ms, past the {timeout_ms}ms deadline")]
    LateSuccess {
        /// Budget in milliseconds
        timeout_ms: u64,
        /// Time at which the predicate passed
        elapsed_ms: u64,
    },

    /// The predicate returned a literal `false`
    #[error("{message}")]
    ExplicitFalse {
        /// Failure message
        message: String,
        /// Whether the message was rendered for its originating instance
        bound: bool,
    },

    /// Programmer error, never retried
    #[error("usage violation: {message}")]
    UsageViolation {
        /// Error message
        message: String,
    },

    /// External abort signal fired mid-execution
    #[error("convergence aborted by caller")]
    AbortedByCaller,

    /// A predicate or callback raised an ordinary failure
    #[error("{message}")]
    Failed {
        /// Failure message
        message: String,
        /// Whether the message was rendered for its originating instance
        bound: bool,
    },

    /// Convergence configuration could not be loaded or is invalid
    #[error("invalid convergence config: {message}")]
    Config {
        /// Error message
        message: String,
    },
}

fn caused_by(cause: &Option<Box<ConvergeError>>) -> String {
    cause
        .as_ref()
        .map_or_else(String::new, |cause| format!(": {cause}"))
}

/// Discriminant of [`ConvergeError`], convenient for matching in handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// See [`ConvergeError::TimeoutExceeded`]
    TimeoutExceeded,
    /// See [`ConvergeError::LateSuccess`]
    LateSuccess,
    /// See [`ConvergeError::ExplicitFalse`]
    ExplicitFalse,
    /// See [`ConvergeError::UsageViolation`]
    UsageViolation,
    /// See [`ConvergeError::AbortedByCaller`]
    AbortedByCaller,
    /// See [`ConvergeError::Failed`]
    Failed,
    /// See [`ConvergeError::Config`]
    Config,
}

impl ConvergeError {
    /// Create a timeout error carrying the last failure
    #[must_use]
    pub fn timeout_exceeded(timeout_ms: u64, runs: u32, cause: Option<Self>) -> Self {
        Self::TimeoutExceeded {
            timeout_ms,
            runs,
            cause: cause.map(Box::new),
        }
    }

    /// Create a late-success error
    #[must_use]
    pub const fn late_success(timeout_ms: u64, elapsed_ms: u64) -> Self {
        Self::LateSuccess {
            timeout_ms,
            elapsed_ms,
        }
    }

    /// Create an explicit-false error
    #[must_use]
    pub fn explicit_false(message: impl Into<String>) -> Self {
        Self::ExplicitFalse {
            message: message.into(),
            bound: false,
        }
    }

    /// Create a usage violation
    #[must_use]
    pub fn usage(message: impl Into<String>) -> Self {
        Self::UsageViolation {
            message: message.into(),
        }
    }

    /// Create an ordinary failure
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            bound: false,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get the error discriminant
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            Self::LateSuccess { .. } => ErrorKind::LateSuccess,
            Self::ExplicitFalse { .. } => ErrorKind::ExplicitFalse,
            Self::UsageViolation { .. } => ErrorKind::UsageViolation,
            Self::AbortedByCaller => ErrorKind::AbortedByCaller,
            Self::Failed { .. } => ErrorKind::Failed,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Errors that abort a queue immediately instead of being retried
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UsageViolation { .. } | Self::AbortedByCaller | Self::Config { .. }
        )
    }

    /// Errors the poll loop keeps retrying while budget remains
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }

    /// Last failure behind a timeout, if any
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        match self {
            Self::TimeoutExceeded { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Bind the error to the instance it originated from.
    ///
    /// Message templates are rendered through `formatter`, substituting a
    /// description of `owner`. Binding an already bound error is a no-op.
    #[must_use]
    pub fn bind(self, owner: &Meta, formatter: &dyn ErrorFormatter, expected: bool) -> Self {
        match self {
            Self::ExplicitFalse {
                message,
                bound: false,
            } => Self::ExplicitFalse {
                message: formatter.format(&message, owner, expected),
                bound: true,
            },
            Self::Failed {
                message,
                bound: false,
            } => Self::Failed {
                message: formatter.format(&message, owner, expected),
                bound: true,
            },
            Self::TimeoutExceeded {
                timeout_ms,
                runs,
                cause,
            } => Self::TimeoutExceeded {
                timeout_ms,
                runs,
                cause: cause.map(|cause| Box::new(cause.bind(owner, formatter, expected))),
            },
            other => other,
        }
    }
}

impl From<String> for ConvergeError {
    fn from(message: String) -> Self {
        Self::failed(message)
    }
}

impl From<&str> for ConvergeError {
    fn from(message: &str) -> Self {
        Self::failed(message)
    }
}
