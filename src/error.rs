//! Timer error types

use core::fmt;

/// Errors raised by timer construction and completion guards
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// A timer was constructed with an empty name
    #[error("timer requires a non-empty name")]
    InvalidName,

    /// A completion operation was invoked on an already-completed timer
    #[error("timer `{0}` already completed")]
    AlreadyCompleted(String),
}

impl TimerError {
    /// Check if this error is the one-shot completion guard
    pub fn is_completion_guard(&self) -> bool {
        matches!(self, TimerError::AlreadyCompleted(_))
    }

    /// Create a completion-guard error for the named timer
    pub fn already_completed(name: impl fmt::Display) -> Self {
        TimerError::AlreadyCompleted(name.to_string())
    }
}

/// Error returned by the measurement operations
///
/// A measurement can fail in two ways: the one-shot guard rejects the call
/// before the wrapped operation runs ([`MeasureError::Timer`]), or the
/// wrapped operation itself fails ([`MeasureError::Operation`]). In the
/// latter case the timer has recorded the failure message and its `end`
/// timestamp, and the original error passes through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasureError<E> {
    /// The completion guard rejected the call; the wrapped operation never ran
    #[error(transparent)]
    Timer(#[from] TimerError),

    /// The wrapped operation failed; the timer recorded it and completed
    #[error("{0}")]
    Operation(E),
}

impl<E> MeasureError<E> {
    /// Check if the wrapped operation ran at all
    pub fn operation_ran(&self) -> bool {
        matches!(self, MeasureError::Operation(_))
    }

    /// Extract the wrapped operation's own error, if that is what failed
    pub fn into_operation(self) -> Option<E> {
        match self {
            MeasureError::Timer(_) => None,
            MeasureError::Operation(e) => Some(e),
        }
    }
}
