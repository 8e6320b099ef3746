//! Retry Session Example
//!
//! A screen-like component loading data through a session, with a flaky
//! backend, a user-supplied cancel button and a teardown on exit.
//!
//! Run with: cargo run --example retry_session

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steadfast::prelude::*;
use steadfast::TracingSink;

// ==================== Backend ====================

/// Errors a pretend HTTP client returns.
#[derive(Debug)]
enum HttpError {
    Connect(String),
    Status(u16),
    Canceled,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Connect(reason) => write!(f, "connect failed: {reason}"),
            HttpError::Status(code) => write!(f, "HTTP {code}"),
            HttpError::Canceled => write!(f, "request canceled"),
        }
    }
}

impl std::error::Error for HttpError {}

impl Classify for HttpError {
    fn classify(&self) -> NormalizedError {
        match self {
            HttpError::Connect(reason) => NormalizedError::network(reason.clone()),
            HttpError::Status(code) if *code >= 500 => {
                NormalizedError::server(self.to_string()).with_status(*code)
            }
            HttpError::Status(code) => NormalizedError::client(self.to_string()).with_status(*code),
            HttpError::Canceled => NormalizedError::abort("request canceled"),
        }
    }
}

/// Fails with a 503 and a refused connection before answering.
async fn fetch_profile(calls: &AtomicU32, token: CancellationToken) -> Result<String, HttpError> {
    let n = calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    if token.is_canceled() {
        return Err(HttpError::Canceled);
    }
    match n {
        0 => Err(HttpError::Status(503)),
        1 => Err(HttpError::Connect("connection refused".into())),
        _ => Ok("ada@example.com".into()),
    }
}

// ==================== Scenarios ====================

async fn example_recovering_load(session: &LifecycleBoundRetrySession<HttpError>) {
    println!("\n=== Example 1: Load recovers after two failures ===");

    let calls = AtomicU32::new(0);
    match session.execute(|token| fetch_profile(&calls, token)).await {
        Ok(email) => println!("Loaded profile: {email}"),
        Err(error) => println!("Load failed: {error}"),
    }
    println!("Backend saw {} calls", calls.load(Ordering::SeqCst));
}

async fn example_not_found(session: &LifecycleBoundRetrySession<HttpError>) {
    println!("\n=== Example 2: A 404 is not retried ===");

    let result: Result<String, _> = session
        .execute(|_| async { Err(HttpError::Status(404)) })
        .await;
    match result {
        Err(RetryError::GaveUp(exhausted)) => println!(
            "Gave up after {} attempt(s): {}",
            exhausted.attempts, exhausted.normalized
        ),
        other => println!("Unexpected: {other:?}"),
    }
}

async fn example_cancel_button(session: &LifecycleBoundRetrySession<HttpError>) {
    println!("\n=== Example 3: The user presses cancel mid-backoff ===");

    let cancel_button = CancellationSource::new();
    let press = {
        let cancel_button = cancel_button.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            println!("  (cancel pressed)");
            cancel_button.cancel();
        })
    };

    let result: Result<String, _> = session
        .execute_with(
            |_| async { Err(HttpError::Status(502)) },
            &cancel_button.token(),
        )
        .await;
    let _ = press.await;

    match result {
        Err(RetryError::Aborted { attempts, .. }) => {
            println!("Aborted after {attempts} attempt(s)")
        }
        other => println!("Unexpected: {other:?}"),
    }
}

async fn example_teardown(session: Arc<LifecycleBoundRetrySession<HttpError>>) {
    println!("\n=== Example 4: Teardown cancels in-flight work ===");

    let background = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .execute(|_| async { Err::<(), _>(HttpError::Connect("timed out".into())) })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("In flight before teardown: {}", session.active_sessions());
    session.teardown();

    match background.await {
        Ok(Err(error)) if error.is_aborted() => println!("Background load aborted"),
        other => println!("Unexpected: {other:?}"),
    }
    println!("In flight after teardown: {}", session.active_sessions());
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::from_secs(1));
    let session = Arc::new(LifecycleBoundRetrySession::new(
        RetryExecutor::new(policy)
            .named("load_profile")
            .with_telemetry(TracingSink)
            .on_give_up(|error: &NormalizedError| tracing::error!(%error, "profile load failed")),
    ));

    example_recovering_load(&session).await;
    example_not_found(&session).await;
    example_cancel_button(&session).await;
    example_teardown(session).await;
}
