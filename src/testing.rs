//! Testing utilities for code built on steadfast.
//!
//! Scripted operations, recording hooks and sinks, and assertion macros for
//! retry outcomes.
//!
//! # Examples
//!
//! ```rust
//! use steadfast::cancel::CancellationToken;
//! use steadfast::testing::{AttemptLog, FlakyOperation};
//! use steadfast::{assert_gave_up, JitterSource, NormalizedError, RetryExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let flaky = FlakyOperation::new("ok").fail_times(NormalizedError::server("503"), 5);
//! let log = AttemptLog::new();
//!
//! let executor = RetryExecutor::<NormalizedError>::new(
//!     RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
//! )
//! .with_jitter(JitterSource::Disabled)
//! .on_attempt(log.hook());
//!
//! let result = executor.execute(|_| flaky.call(), &CancellationToken::never()).await;
//!
//! assert_gave_up!(result, attempts = 2);
//! assert_eq!(flaky.calls(), 2);
//! assert_eq!(log.attempt_numbers(), vec![1, 2]);
//! # });
//! ```

use std::collections::VecDeque;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::classify::{ErrorKind, NormalizedError};
use crate::retry::AttemptRecord;
use crate::telemetry::{AttemptTelemetry, TelemetrySink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An operation that fails on a script, then succeeds.
///
/// Failures are consumed in the order they were added. Once the script runs
/// out, every call returns a clone of the success value.
#[derive(Debug)]
pub struct FlakyOperation<T> {
    script: Mutex<VecDeque<(NormalizedError, usize)>>,
    value: T,
    calls: AtomicU32,
}

impl<T: Clone> FlakyOperation<T> {
    /// An operation that succeeds with `value` once its script is spent.
    pub fn new(value: T) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            value,
            calls: AtomicU32::new(0),
        }
    }

    /// Append `times` consecutive failures with `error`.
    pub fn fail_times(self, error: NormalizedError, times: usize) -> Self {
        if times > 0 {
            lock(&self.script).push_back((error, times));
        }
        self
    }

    /// Append failures with `error` that never run out.
    pub fn always_fail(self, error: NormalizedError) -> Self {
        self.fail_times(error, usize::MAX)
    }

    /// Run one attempt synchronously.
    pub fn attempt(&self) -> Result<T, NormalizedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut script = lock(&self.script);
        let Some((error, remaining)) = script.front_mut() else {
            return Ok(self.value.clone());
        };
        let error = error.clone();
        *remaining -= 1;
        if *remaining == 0 {
            script.pop_front();
        }
        Err(error)
    }

    /// Run one attempt as a ready future, for use as an executor operation.
    pub fn call(&self) -> Ready<Result<T, NormalizedError>> {
        ready(self.attempt())
    }

    /// How many attempts have been made.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Collects [`AttemptRecord`]s from an executor's `on_attempt` hook.
#[derive(Debug, Clone, Default)]
pub struct AttemptLog {
    records: Arc<Mutex<Vec<AttemptRecord>>>,
}

impl AttemptLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A hook that appends to this log.
    pub fn hook(&self) -> impl Fn(&AttemptRecord) + Send + Sync + 'static {
        let records = Arc::clone(&self.records);
        move |record: &AttemptRecord| lock(&records).push(record.clone())
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<AttemptRecord> {
        lock(&self.records).clone()
    }

    /// The attempt numbers recorded so far, in delivery order.
    pub fn attempt_numbers(&self) -> Vec<u32> {
        lock(&self.records)
            .iter()
            .map(|record| record.attempt_number)
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An owned copy of one [`AttemptTelemetry`] event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAttempt {
    /// Operation name.
    pub operation: String,
    /// Attempt number.
    pub attempt: u32,
    /// Status code, if any.
    pub status_code: Option<u16>,
    /// Whether the attempt was retryable.
    pub retryable: bool,
    /// Failure kind.
    pub kind: ErrorKind,
    /// Failure message.
    pub message: String,
}

/// A [`TelemetrySink`] that keeps every event in memory.
///
/// Clones share storage, so one clone can go to the executor while the test
/// keeps another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<RecordedAttempt>>>,
}

impl RecordingSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<RecordedAttempt> {
        lock(&self.events).clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, event: &AttemptTelemetry<'_>) {
        lock(&self.events).push(RecordedAttempt {
            operation: event.operation.to_string(),
            attempt: event.attempt,
            status_code: event.status_code,
            retryable: event.retryable,
            kind: event.kind,
            message: event.message.to_string(),
        });
    }
}

/// Assert that a retry result gave up.
///
/// Optionally checks the number of attempts made.
///
/// # Example
///
/// ```rust
/// use steadfast::{assert_gave_up, GiveUpReason, NormalizedError, RetryError, RetryExhausted};
/// use std::time::Duration;
///
/// let error = NormalizedError::client("bad input");
/// let result: Result<(), _> = Err(RetryError::GaveUp(RetryExhausted::new(
///     error.clone(),
///     error,
///     1,
///     Duration::ZERO,
///     GiveUpReason::NonRetryable,
/// )));
/// assert_gave_up!(result, attempts = 1);
/// ```
#[macro_export]
macro_rules! assert_gave_up {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::GaveUp(_)) => {}
            other => panic!("Expected GaveUp, got {:?}", other),
        }
    };
    ($result:expr, attempts = $attempts:expr) => {
        match $result {
            Err($crate::RetryError::GaveUp(exhausted)) => {
                assert_eq!(
                    exhausted.attempts, $attempts,
                    "GaveUp after an unexpected number of attempts"
                );
            }
            other => panic!("Expected GaveUp, got {:?}", other),
        }
    };
}

/// Assert that a retry result was aborted by cancellation.
///
/// Optionally checks the number of attempts started.
///
/// # Example
///
/// ```rust
/// use steadfast::{assert_aborted, NormalizedError, RetryError};
///
/// let result: Result<(), RetryError<NormalizedError>> =
///     Err(RetryError::Aborted { attempts: 0, cause: None });
/// assert_aborted!(result, attempts = 0);
/// ```
#[macro_export]
macro_rules! assert_aborted {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::Aborted { .. }) => {}
            other => panic!("Expected Aborted, got {:?}", other),
        }
    };
    ($result:expr, attempts = $attempts:expr) => {
        match $result {
            Err($crate::RetryError::Aborted { attempts, .. }) => {
                assert_eq!(
                    attempts, $attempts,
                    "Aborted after an unexpected number of attempts"
                );
            }
            other => panic!("Expected Aborted, got {:?}", other),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RetryError;

    #[test]
    fn flaky_operation_follows_script() {
        let flaky = FlakyOperation::new(7)
            .fail_times(NormalizedError::network("down"), 2)
            .fail_times(NormalizedError::client("nope"), 1);

        assert_eq!(flaky.attempt().unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(flaky.attempt().unwrap_err().kind(), ErrorKind::Network);
        assert_eq!(flaky.attempt().unwrap_err().kind(), ErrorKind::Client);
        assert_eq!(flaky.attempt(), Ok(7));
        assert_eq!(flaky.attempt(), Ok(7));
        assert_eq!(flaky.calls(), 5);
    }

    #[test]
    fn zero_failures_are_skipped() {
        let flaky = FlakyOperation::new(()).fail_times(NormalizedError::network("down"), 0);
        assert_eq!(flaky.attempt(), Ok(()));
    }

    #[test]
    fn always_fail_never_recovers() {
        let flaky = FlakyOperation::new(()).always_fail(NormalizedError::timeout("slow"));
        for _ in 0..100 {
            assert!(flaky.attempt().is_err());
        }
    }

    #[test]
    fn attempt_log_records_through_hook() {
        let log = AttemptLog::new();
        let hook = log.hook();
        hook(&AttemptRecord {
            attempt_number: 1,
            error: NormalizedError::server("500"),
            retryable: true,
            is_last_attempt: false,
        });

        assert_eq!(log.len(), 1);
        assert_eq!(log.attempt_numbers(), vec![1]);
        assert!(log.records()[0].retryable);
    }

    #[test]
    fn recording_sink_copies_events() {
        let sink = RecordingSink::new();
        let handle = sink.clone();
        sink.record(&AttemptTelemetry {
            operation: "refund",
            attempt: 1,
            status_code: None,
            retryable: false,
            kind: ErrorKind::Client,
            message: "invalid amount",
        });

        assert_eq!(handle.len(), 1);
        assert_eq!(handle.events()[0].operation, "refund");
        assert!(!handle.is_empty());
    }

    #[test]
    fn assert_aborted_macro() {
        let result: Result<(), RetryError<NormalizedError>> = Err(RetryError::Aborted {
            attempts: 2,
            cause: None,
        });
        assert_aborted!(result, attempts = 2);
    }

    #[test]
    #[should_panic(expected = "Expected GaveUp")]
    fn assert_gave_up_panics_on_success() {
        let result: Result<i32, RetryError<NormalizedError>> = Ok(1);
        assert_gave_up!(result);
    }

    #[test]
    #[should_panic(expected = "Expected Aborted")]
    fn assert_aborted_panics_on_success() {
        let result: Result<i32, RetryError<NormalizedError>> = Ok(1);
        assert_aborted!(result);
    }
}
