//! End-to-end retry scenarios against paused tokio time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steadfast::cancel::{CancellationSource, CancellationToken};
use steadfast::testing::{AttemptLog, FlakyOperation, RecordingSink};
use steadfast::{
    assert_aborted, assert_gave_up, AttemptRecord, ErrorKind, GiveUpReason, JitterSource, NormalizedError,
    RetryError, RetryExecutor, RetryPolicy,
};
use tokio::time::Instant;

fn example_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(1000))
}

#[tokio::test(start_paused = true)]
async fn two_failures_then_success() {
    let flaky = FlakyOperation::new("posted").fail_times(NormalizedError::network("offline"), 2);
    let log = AttemptLog::new();
    let start = Instant::now();

    let result = RetryExecutor::new(example_policy())
        .on_attempt(log.hook())
        .execute(|_| flaky.call(), &CancellationToken::never())
        .await;

    assert_eq!(result, Ok("posted"));
    assert_eq!(log.len(), 2);
    assert!(start.elapsed() < Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn always_non_retryable() {
    let flaky = FlakyOperation::new(()).always_fail(NormalizedError::client("bad request"));
    let log = AttemptLog::new();
    let gave_up = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let result = RetryExecutor::new(example_policy())
        .on_attempt(log.hook())
        .on_give_up({
            let gave_up = gave_up.clone();
            move |error: &NormalizedError| {
                assert_eq!(error.kind(), ErrorKind::Client);
                gave_up.fetch_add(1, Ordering::SeqCst);
            }
        })
        .execute(|_| flaky.call(), &CancellationToken::never())
        .await;

    assert_gave_up!(result, attempts = 1);
    assert_eq!(log.len(), 1);
    assert_eq!(gave_up.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_sleep_on_second_attempt() {
    let source = CancellationSource::new();
    let flaky = FlakyOperation::new(()).always_fail(NormalizedError::server("unavailable"));
    let canceled_at = Arc::new(std::sync::Mutex::new(None));

    // Backoff after attempt 1 is 250ms, after attempt 2 it is 500ms.
    let executor = RetryExecutor::new(RetryPolicy::new(
        5,
        Duration::from_millis(250),
        Duration::from_millis(1000),
    ))
    .with_jitter(JitterSource::Disabled)
    .on_attempt({
        let source = source.clone();
        let canceled_at = canceled_at.clone();
        move |record: &AttemptRecord| {
            if record.attempt_number == 2 {
                // Fire 50ms into the 500ms sleep that follows attempt 2.
                let source = source.clone();
                let canceled_at = canceled_at.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    *canceled_at.lock().unwrap() = Some(Instant::now());
                    source.cancel();
                });
            }
        }
    });

    let result = executor
        .execute(|_| flaky.call(), &source.token())
        .await;
    let resolved_at = Instant::now();

    assert_aborted!(result, attempts = 2);
    assert_eq!(flaky.calls(), 2);
    let canceled_at = canceled_at.lock().unwrap().expect("cancel fired");
    assert!(resolved_at - canceled_at < Duration::from_millis(5));
}

#[tokio::test(start_paused = true)]
async fn exhaustion_performs_exactly_n_attempts() {
    for attempts in 1..=6 {
        let flaky = FlakyOperation::new(()).always_fail(NormalizedError::timeout("slow"));

        let result = RetryExecutor::new(RetryPolicy::new(
            attempts,
            Duration::from_millis(10),
            Duration::from_millis(50),
        ))
        .execute(|_| flaky.call(), &CancellationToken::never())
        .await;

        assert_eq!(flaky.calls(), attempts);
        match result {
            Err(RetryError::GaveUp(exhausted)) => {
                assert_eq!(exhausted.attempts, attempts);
                assert_eq!(exhausted.reason, GiveUpReason::Exhausted);
            }
            other => panic!("expected GaveUp, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_as_cancellation() {
    let deadline = CancellationSource::new();
    let _timer = deadline.cancel_after(Duration::from_millis(250));
    let flaky = FlakyOperation::new(()).always_fail(NormalizedError::network("down"));
    let start = Instant::now();

    let result = RetryExecutor::new(RetryPolicy::new(
        100,
        Duration::from_millis(100),
        Duration::from_millis(100),
    ))
    .with_jitter(JitterSource::Disabled)
    .execute(|_| flaky.call(), &deadline.token())
    .await;

    assert_aborted!(result);
    assert_eq!(flaky.calls(), 3);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(250));
    assert!(elapsed < Duration::from_millis(260));
}

#[tokio::test]
async fn operation_observing_cancellation_reports_abort() {
    let source = CancellationSource::new();
    let sink = RecordingSink::new();

    let result: Result<(), _> = RetryExecutor::new(example_policy())
        .named("void_invoice")
        .with_telemetry(sink.clone())
        .execute(
            |token: CancellationToken| {
                source.cancel();
                async move {
                    if token.is_canceled() {
                        Err(NormalizedError::abort("operation canceled"))
                    } else {
                        Ok(())
                    }
                }
            },
            &source.token(),
        )
        .await;

    match result {
        Err(RetryError::Aborted {
            attempts: 1,
            cause: Some(cause),
        }) => assert_eq!(cause.message(), "operation canceled"),
        other => panic!("expected abort with cause, got {other:?}"),
    }
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ErrorKind::Abort);
    assert!(!events[0].retryable);
}

#[tokio::test(start_paused = true)]
async fn on_attempt_delivered_in_order() {
    let flaky = FlakyOperation::new(())
        .fail_times(NormalizedError::network("a"), 1)
        .fail_times(NormalizedError::server("b"), 1)
        .fail_times(NormalizedError::timeout("c"), 1);
    let log = AttemptLog::new();

    let result = RetryExecutor::new(RetryPolicy::new(
        5,
        Duration::from_millis(10),
        Duration::from_millis(100),
    ))
    .on_attempt(log.hook())
    .execute(|_| flaky.call(), &CancellationToken::never())
    .await;

    assert!(result.is_ok());
    let messages: Vec<String> = log
        .records()
        .into_iter()
        .map(|record| record.error.message().to_string())
        .collect();
    assert_eq!(messages, vec!["a", "b", "c"]);
    assert_eq!(log.attempt_numbers(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn attempts_never_overlap() {
    let in_flight = Arc::new(AtomicU32::new(0));
    let max_seen = Arc::new(AtomicU32::new(0));
    let calls = AtomicU32::new(0);

    let result = RetryExecutor::new(RetryPolicy::new(
        4,
        Duration::from_millis(10),
        Duration::from_millis(40),
    ))
    .execute(
        |_| {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(25)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if n < 3 {
                    Err(NormalizedError::network("flap"))
                } else {
                    Ok(n)
                }
            }
        },
        &CancellationToken::never(),
    )
    .await;

    assert_eq!(result, Ok(3));
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}
