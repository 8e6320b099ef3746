//! The retry loop.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::backoff::JitterSource;
use crate::cancel::{sleep, CancellationToken, SleepOutcome};
use crate::classify::{Classify, NormalizedError};
use crate::telemetry::{AttemptTelemetry, TelemetrySink};

use super::error::{GiveUpReason, RetryError, RetryExhausted};
use super::policy::{AttemptRecord, RetryPolicy};

type Classifier<E> = Arc<dyn Fn(&E) -> NormalizedError + Send + Sync>;
type AttemptHook = Arc<dyn Fn(&AttemptRecord) + Send + Sync>;
type GiveUpHook = Arc<dyn Fn(&NormalizedError) + Send + Sync>;

/// Runs an operation under a [`RetryPolicy`], with cooperative cancellation.
///
/// Each execution moves through `Running -> (Sleeping -> Running)* ->
/// {Succeeded, Exhausted, Aborted}`:
///
/// - cancellation is checked before the first attempt, after every failed
///   attempt, and throughout every backoff sleep
/// - a failure the classifier marks [`Abort`](crate::ErrorKind::Abort) ends
///   the execution immediately, without consulting the policy
/// - any other failure is reported to `on_attempt`, then retried while the
///   policy allows it
/// - when the executor gives up, `on_give_up` runs before the error is
///   returned
///
/// Hooks run synchronously on the executing task. A panicking hook is not
/// caught and takes the execution down with it.
///
/// The executor is lifecycle-agnostic; see
/// [`LifecycleBoundRetrySession`](crate::LifecycleBoundRetrySession) for
/// binding executions to an owner's lifetime.
///
/// # Examples
///
/// ```rust
/// use steadfast::cancel::CancellationToken;
/// use steadfast::{JitterSource, NormalizedError, RetryExecutor, RetryPolicy};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let calls = AtomicU32::new(0);
/// let executor = RetryExecutor::<NormalizedError>::new(
///     RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)),
/// )
/// .named("load_catalog");
///
/// let result = executor
///     .execute(
///         |_token| {
///             let n = calls.fetch_add(1, Ordering::SeqCst);
///             async move {
///                 if n == 0 {
///                     Err(NormalizedError::network("connection reset"))
///                 } else {
///                     Ok("catalog")
///                 }
///             }
///         },
///         &CancellationToken::never(),
///     )
///     .await;
///
/// assert_eq!(result, Ok("catalog"));
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// # });
/// ```
pub struct RetryExecutor<E> {
    policy: RetryPolicy,
    classifier: Classifier<E>,
    on_attempt: Option<AttemptHook>,
    on_give_up: Option<GiveUpHook>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    jitter: JitterSource,
    operation: Cow<'static, str>,
}

impl<E: Classify + 'static> RetryExecutor<E> {
    /// An executor for errors that classify themselves.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_classifier(policy, |error: &E| error.classify())
    }
}

impl<E> RetryExecutor<E> {
    /// An executor that classifies errors with `classifier`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use steadfast::{NormalizedError, RetryExecutor, RetryPolicy};
    ///
    /// let executor = RetryExecutor::with_classifier(RetryPolicy::default(), |err: &std::io::Error| {
    ///     match err.kind() {
    ///         std::io::ErrorKind::TimedOut => NormalizedError::timeout(err.to_string()),
    ///         std::io::ErrorKind::Interrupted => NormalizedError::abort(err.to_string()),
    ///         _ => NormalizedError::network(err.to_string()),
    ///     }
    /// });
    /// assert_eq!(executor.operation_name(), "operation");
    /// ```
    pub fn with_classifier<C>(policy: RetryPolicy, classifier: C) -> Self
    where
        C: Fn(&E) -> NormalizedError + Send + Sync + 'static,
    {
        Self {
            policy,
            classifier: Arc::new(classifier),
            on_attempt: None,
            on_give_up: None,
            telemetry: None,
            jitter: JitterSource::default(),
            operation: Cow::Borrowed("operation"),
        }
    }

    /// Name the operation, for logs and telemetry.
    pub fn named(mut self, operation: impl Into<Cow<'static, str>>) -> Self {
        self.operation = operation.into();
        self
    }

    /// Call `hook` once per failed attempt, in attempt order.
    ///
    /// Abort-kind failures are not reported here; they end the execution.
    pub fn on_attempt<H>(mut self, hook: H) -> Self
    where
        H: Fn(&AttemptRecord) + Send + Sync + 'static,
    {
        self.on_attempt = Some(Arc::new(hook));
        self
    }

    /// Call `hook` with the final failure when the executor gives up.
    pub fn on_give_up<H>(mut self, hook: H) -> Self
    where
        H: Fn(&NormalizedError) + Send + Sync + 'static,
    {
        self.on_give_up = Some(Arc::new(hook));
        self
    }

    /// Send per-attempt telemetry to `sink`.
    pub fn with_telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + 'static,
    {
        self.telemetry = Some(Arc::new(sink));
        self
    }

    /// Replace the jitter source.
    pub fn with_jitter(mut self, jitter: JitterSource) -> Self {
        self.jitter = jitter;
        self
    }

    /// The executor's policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The name used in logs and telemetry.
    pub fn operation_name(&self) -> &str {
        &self.operation
    }

    /// Run `operation` until it succeeds, the executor gives up, or
    /// `cancellation` fires.
    ///
    /// `operation` receives a clone of `cancellation` on every attempt and is
    /// expected, but not forced, to observe it. An operation that ignores
    /// cancellation still runs to completion, and its result is returned.
    ///
    /// # Panics
    ///
    /// Panics if the policy fails [`RetryPolicy::validate`].
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        cancellation: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(error) = self.policy.validate() {
            panic!("invalid retry policy: {error}");
        }

        let span = tracing::debug_span!(
            "retry",
            operation = %self.operation,
            attempts = self.policy.attempts()
        );
        self.run(operation, cancellation).instrument(span).await
    }

    async fn run<T, F, Fut>(
        &self,
        mut operation: F,
        cancellation: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancellation.is_canceled() {
            tracing::debug!("canceled before first attempt");
            return Err(RetryError::Aborted {
                attempts: 0,
                cause: None,
            });
        }

        let start = Instant::now();
        let mut attempt = 1u32;

        loop {
            let delay = match operation(cancellation.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) => self.settle_failure(attempt, error, cancellation, start)?,
            };

            tracing::debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "backing off before retry"
            );

            match sleep(delay, cancellation).await {
                SleepOutcome::Elapsed => attempt += 1,
                SleepOutcome::Canceled => {
                    tracing::debug!(attempt, "canceled during backoff");
                    return Err(RetryError::Aborted {
                        attempts: attempt,
                        cause: None,
                    });
                }
            }
        }
    }

    /// Decide what follows failed attempt `attempt`: the backoff delay, or
    /// the terminal error.
    fn settle_failure(
        &self,
        attempt: u32,
        error: E,
        cancellation: &CancellationToken,
        start: Instant,
    ) -> Result<Duration, RetryError<E>> {
        let normalized = (self.classifier)(&error);

        if normalized.is_abort() {
            self.report(attempt, &normalized, false);
            tracing::debug!(attempt, message = normalized.message(), "operation aborted");
            return Err(RetryError::Aborted {
                attempts: attempt,
                cause: Some(error),
            });
        }

        let retryable = self.policy.is_retryable(&normalized);
        let is_last_attempt = !retryable || attempt >= self.policy.attempts();

        self.report(attempt, &normalized, retryable);
        tracing::debug!(
            attempt,
            kind = normalized.kind().as_str(),
            retryable,
            message = normalized.message(),
            "attempt failed"
        );
        if let Some(hook) = &self.on_attempt {
            hook(&AttemptRecord {
                attempt_number: attempt,
                error: normalized.clone(),
                retryable,
                is_last_attempt,
            });
        }

        if is_last_attempt {
            let reason = if retryable {
                GiveUpReason::Exhausted
            } else {
                GiveUpReason::NonRetryable
            };
            tracing::warn!(
                attempt,
                kind = normalized.kind().as_str(),
                %reason,
                "giving up"
            );
            if let Some(hook) = &self.on_give_up {
                hook(&normalized);
            }
            return Err(RetryError::GaveUp(RetryExhausted::new(
                error,
                normalized,
                attempt,
                start.elapsed(),
                reason,
            )));
        }

        if cancellation.is_canceled() {
            tracing::debug!(attempt, "canceled after failed attempt");
            return Err(RetryError::Aborted {
                attempts: attempt,
                cause: None,
            });
        }

        Ok(self.jitter.delay(
            attempt,
            self.policy.base_delay(),
            self.policy.max_delay(),
        ))
    }

    fn report(&self, attempt: u32, normalized: &NormalizedError, retryable: bool) {
        if let Some(sink) = &self.telemetry {
            sink.record(&AttemptTelemetry {
                operation: &self.operation,
                attempt,
                status_code: normalized.status_code(),
                retryable,
                kind: normalized.kind(),
                message: normalized.message(),
            });
        }
    }
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            classifier: Arc::clone(&self.classifier),
            on_attempt: self.on_attempt.clone(),
            on_give_up: self.on_give_up.clone(),
            telemetry: self.telemetry.clone(),
            jitter: self.jitter.clone(),
            operation: self.operation.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("operation", &self.operation)
            .field("policy", &self.policy)
            .field("jitter", &self.jitter)
            .field("on_attempt", &self.on_attempt.is_some())
            .field("on_give_up", &self.on_give_up.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

/// Run `operation` under `policy` with default hooks and jitter.
///
/// Shorthand for `RetryExecutor::new(policy).execute(operation, cancellation)`.
///
/// # Examples
///
/// ```rust
/// use steadfast::cancel::CancellationToken;
/// use steadfast::{execute_with_retry, NormalizedError, RetryError, RetryPolicy};
///
/// # tokio_test::block_on(async {
/// let result: Result<(), _> = execute_with_retry(
///     |_token| async { Err(NormalizedError::client("invalid sku")) },
///     RetryPolicy::default(),
///     &CancellationToken::never(),
/// )
/// .await;
///
/// match result {
///     Err(RetryError::GaveUp(exhausted)) => assert_eq!(exhausted.attempts, 1),
///     other => panic!("expected give-up, got {other:?}"),
/// }
/// # });
/// ```
pub async fn execute_with_retry<T, E, F, Fut>(
    operation: F,
    policy: RetryPolicy,
    cancellation: &CancellationToken,
) -> Result<T, RetryError<E>>
where
    E: Classify + 'static,
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryExecutor::new(policy)
        .execute(operation, cancellation)
        .await
}
