//! Retry policy types and configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::classify::NormalizedError;

use super::error::PolicyError;

/// Predicate deciding whether a normalized failure should be retried.
pub type RetryPredicate = Arc<dyn Fn(&NormalizedError) -> bool + Send + Sync>;

/// A retry policy describing how many times to try and how long to wait.
///
/// Policies are pure data: they describe retry behavior but don't execute it.
/// An executor snapshots its policy, so a policy never changes underneath a
/// running execution.
///
/// # Invariants
///
/// - `attempts >= 1` (total tries, including the first)
/// - `base_delay > 0`
/// - `base_delay <= max_delay`
///
/// [`validate`](Self::validate) checks these. Executing with a policy that
/// breaks them is a programmer error and panics.
///
/// # Examples
///
/// ```rust
/// use steadfast::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(5, Duration::from_millis(50), Duration::from_secs(2));
/// assert_eq!(policy.attempts(), 5);
/// assert!(policy.validate().is_ok());
///
/// let inverted = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(1));
/// assert!(inverted.validate().is_err());
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    is_retryable: RetryPredicate,
}

impl RetryPolicy {
    /// Create a policy.
    ///
    /// Failures are retried when their
    /// [`retryable_hint`](NormalizedError::retryable_hint) is set; use
    /// [`retry_if`](Self::retry_if) to change that.
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            max_delay,
            is_retryable: Arc::new(NormalizedError::retryable_hint),
        }
    }

    /// Create a policy, rejecting invalid settings.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use steadfast::{PolicyError, RetryPolicy};
    /// use std::time::Duration;
    ///
    /// let err = RetryPolicy::try_new(0, Duration::from_millis(1), Duration::from_millis(1))
    ///     .unwrap_err();
    /// assert_eq!(err, PolicyError::ZeroAttempts);
    /// ```
    pub fn try_new(
        attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, PolicyError> {
        let policy = Self::new(attempts, base_delay, max_delay);
        policy.validate()?;
        Ok(policy)
    }

    /// Set the total number of attempts.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the delay ceiling for the first retry.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the cap on any single delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Replace the retry predicate.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use steadfast::{ErrorKind, NormalizedError, RetryPolicy};
    ///
    /// // Only retry timeouts, whatever the classifier hinted.
    /// let policy = RetryPolicy::default()
    ///     .retry_if(|err: &NormalizedError| err.kind() == ErrorKind::Timeout);
    ///
    /// assert!(policy.is_retryable(&NormalizedError::timeout("slow")));
    /// assert!(!policy.is_retryable(&NormalizedError::server("boom")));
    /// ```
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&NormalizedError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(predicate);
        self
    }

    /// Total attempts allowed, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay ceiling for the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Cap on any single delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Run the retry predicate.
    pub fn is_retryable(&self, error: &NormalizedError) -> bool {
        (self.is_retryable)(error)
    }

    /// Check the policy's invariants.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if self.base_delay.is_zero() {
            return Err(PolicyError::ZeroBaseDelay);
        }
        if self.max_delay < self.base_delay {
            return Err(PolicyError::MaxBelowBase {
                base_delay: self.base_delay,
                max_delay: self.max_delay,
            });
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 100ms base delay, 1s cap.
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(1))
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// One failed attempt, as reported to `on_attempt` hooks.
///
/// Records are created once per failed attempt and never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Which attempt failed (1-indexed).
    pub attempt_number: u32,
    /// The classified failure.
    pub error: NormalizedError,
    /// What the policy's predicate said about it.
    pub retryable: bool,
    /// Whether the executor will give up after this attempt.
    pub is_last_attempt: bool,
}
