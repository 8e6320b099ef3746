//! Error types for retry operations.

use std::fmt;
use std::time::Duration;

use crate::classify::NormalizedError;

/// Why an execution stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Every allowed attempt failed.
    Exhausted,
    /// The policy declined to retry the last failure.
    NonRetryable,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveUpReason::Exhausted => f.write_str("attempts exhausted"),
            GiveUpReason::NonRetryable => f.write_str("error is not retryable"),
        }
    }
}

/// The terminal failure of an execution that gave up.
///
/// Only the last attempt's error is kept. Earlier failures are visible only
/// through the `on_attempt` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The error from the final attempt.
    pub final_error: E,
    /// How the classifier described `final_error`.
    pub normalized: NormalizedError,
    /// Total number of attempts made.
    pub attempts: u32,
    /// Time from the first attempt to giving up.
    pub total_duration: Duration,
    /// Why no further attempt was made.
    pub reason: GiveUpReason,
}

impl<E> RetryExhausted<E> {
    /// Create a new RetryExhausted error.
    pub fn new(
        final_error: E,
        normalized: NormalizedError,
        attempts: u32,
        total_duration: Duration,
        reason: GiveUpReason,
    ) -> Self {
        Self {
            final_error,
            normalized,
            attempts,
            total_duration,
            reason,
        }
    }

    /// Extract the final error, discarding metadata.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Get a reference to the final error.
    pub fn error(&self) -> &E {
        &self.final_error
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempts ({}, {:?}): {}",
            self.attempts, self.reason, self.total_duration, self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

/// The failure side of a retried execution.
///
/// # Examples
///
/// ```rust
/// use steadfast::cancel::CancellationSource;
/// use steadfast::{execute_with_retry, NormalizedError, RetryError, RetryPolicy};
///
/// # tokio_test::block_on(async {
/// let source = CancellationSource::new();
/// source.cancel();
///
/// let result = execute_with_retry(
///     |_token| async { Ok::<_, NormalizedError>(1) },
///     RetryPolicy::default(),
///     &source.token(),
/// )
/// .await;
///
/// assert!(matches!(result, Err(RetryError::Aborted { attempts: 0, cause: None })));
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Attempts ran out, or the last failure was not retryable.
    GaveUp(RetryExhausted<E>),
    /// Cancellation stopped the execution.
    Aborted {
        /// Attempts started before cancellation was observed.
        attempts: u32,
        /// The operation's own error, when it reported an abort-kind failure.
        cause: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Returns true if cancellation stopped the execution.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RetryError::Aborted { .. })
    }

    /// Returns true if the execution gave up on its own.
    pub fn is_gave_up(&self) -> bool {
        matches!(self, RetryError::GaveUp(_))
    }

    /// Attempts started before the execution ended.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::GaveUp(exhausted) => exhausted.attempts,
            RetryError::Aborted { attempts, .. } => *attempts,
        }
    }

    /// The operation error that ended the execution, if there was one.
    pub fn into_error(self) -> Option<E> {
        match self {
            RetryError::GaveUp(exhausted) => Some(exhausted.final_error),
            RetryError::Aborted { cause, .. } => cause,
        }
    }

    /// The give-up details, if the execution gave up.
    pub fn as_exhausted(&self) -> Option<&RetryExhausted<E>> {
        match self {
            RetryError::GaveUp(exhausted) => Some(exhausted),
            RetryError::Aborted { .. } => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::GaveUp(exhausted) => fmt::Display::fmt(exhausted, f),
            RetryError::Aborted {
                attempts,
                cause: Some(cause),
            } => write!(f, "aborted during attempt {}: {}", attempts, cause),
            RetryError::Aborted { attempts, cause: None } => {
                write!(f, "canceled after {} attempts", attempts)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetryError::GaveUp(exhausted) => Some(&exhausted.final_error),
            RetryError::Aborted { cause, .. } => {
                cause.as_ref().map(|c| c as &(dyn std::error::Error + 'static))
            }
        }
    }
}

/// A policy that breaks its invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// `attempts` was zero.
    ZeroAttempts,
    /// `base_delay` was zero.
    ZeroBaseDelay,
    /// `max_delay` was below `base_delay`.
    MaxBelowBase {
        /// The configured base delay.
        base_delay: Duration,
        /// The configured maximum delay.
        max_delay: Duration,
    },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::ZeroAttempts => f.write_str("retry policy must allow at least one attempt"),
            PolicyError::ZeroBaseDelay => f.write_str("retry policy base delay must be positive"),
            PolicyError::MaxBelowBase {
                base_delay,
                max_delay,
            } => write!(
                f,
                "retry policy max delay {:?} is below base delay {:?}",
                max_delay, base_delay
            ),
        }
    }
}

impl std::error::Error for PolicyError {}
