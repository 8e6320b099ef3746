//! Retry executions bound to an owner's lifetime.
//!
//! A [`LifecycleBoundRetrySession`] is the piece a long-lived component holds
//! on to: a screen, a connection handler, a background worker. Every
//! execution it starts gets its own cancellation source, composed with the
//! session's lifecycle token and any caller-supplied token. Tearing the
//! session down cancels everything still in flight, and nothing started
//! afterwards gets past the pre-attempt cancellation check.
//!
//! # Examples
//!
//! ```rust
//! use steadfast::{LifecycleBoundRetrySession, NormalizedError, RetryExecutor, RetryPolicy};
//!
//! # tokio_test::block_on(async {
//! let session = LifecycleBoundRetrySession::new(
//!     RetryExecutor::<NormalizedError>::new(RetryPolicy::default()).named("load_cart"),
//! );
//!
//! let cart = session
//!     .execute(|_token| async { Ok::<_, NormalizedError>(vec!["sku-1"]) })
//!     .await;
//! assert_eq!(cart, Ok(vec!["sku-1"]));
//!
//! session.teardown();
//! let late = session
//!     .execute(|_token| async { Ok::<Vec<&str>, NormalizedError>(vec![]) })
//!     .await;
//! assert!(late.unwrap_err().is_aborted());
//! # });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::cancel::{compose, CancellationSource, CancellationToken};
use crate::retry::{RetryError, RetryExecutor};

/// Runs retry executions that end, at the latest, when the session does.
///
/// `execute` and `cancel_all` may be called concurrently from any number of
/// tasks; the set of in-flight executions is guarded by a mutex and
/// `cancel_all` works on a snapshot of it.
///
/// Dropping the session tears it down.
pub struct LifecycleBoundRetrySession<E> {
    executor: RetryExecutor<E>,
    lifecycle: CancellationSource,
    tracked: Mutex<Tracked>,
}

#[derive(Default)]
struct Tracked {
    next_id: u64,
    live: HashMap<u64, CancellationSource>,
}

impl<E> LifecycleBoundRetrySession<E> {
    /// A session running executions through `executor`.
    pub fn new(executor: RetryExecutor<E>) -> Self {
        Self {
            executor,
            lifecycle: CancellationSource::new(),
            tracked: Mutex::new(Tracked::default()),
        }
    }

    /// Run `operation` through the session's executor.
    ///
    /// The execution is canceled by [`cancel_all`](Self::cancel_all),
    /// [`teardown`](Self::teardown), or dropping the session.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), but `external` can cancel too.
    ///
    /// `external` is only observed, never canceled.
    pub async fn execute_with<T, F, Fut>(
        &self,
        operation: F,
        external: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(operation, Some(external)).await
    }

    async fn run<T, F, Fut>(
        &self,
        operation: F,
        external: Option<&CancellationToken>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (id, source) = self.register();
        let lifecycle = self.lifecycle.token();
        let composite = compose([&source.token(), &lifecycle].into_iter().chain(external));
        // Declared after the composite so it drops first: canceling the
        // execution's source still reaches the token handed to `operation`.
        let _guard = SessionGuard {
            tracked: &self.tracked,
            id,
            source,
        };

        let token = composite.token();
        self.executor.execute(operation, &token).await
    }

    fn register(&self) -> (u64, CancellationSource) {
        let source = CancellationSource::new();
        let mut tracked = lock(&self.tracked);
        let id = tracked.next_id;
        tracked.next_id += 1;
        tracked.live.insert(id, source.clone());
        (id, source)
    }

    /// Cancel every in-flight execution.
    ///
    /// Executions started after this call are unaffected. Returns how many
    /// executions this call canceled.
    pub fn cancel_all(&self) -> usize {
        let live: Vec<CancellationSource> = lock(&self.tracked).live.values().cloned().collect();
        let canceled = live.iter().filter(|source| source.cancel()).count();
        if canceled > 0 {
            tracing::debug!(
                operation = self.executor.operation_name(),
                canceled,
                "canceled in-flight retry sessions"
            );
        }
        canceled
    }

    /// End the session's lifecycle.
    ///
    /// Cancels every in-flight execution; any later `execute` aborts before
    /// its first attempt. Calling this more than once is harmless.
    pub fn teardown(&self) {
        if self.lifecycle.cancel() {
            tracing::debug!(
                operation = self.executor.operation_name(),
                "retry session torn down"
            );
        }
        self.cancel_all();
    }

    /// Whether [`teardown`](Self::teardown) has run.
    pub fn is_torn_down(&self) -> bool {
        self.lifecycle.is_canceled()
    }

    /// The token that cancels when the session is torn down.
    pub fn lifecycle_token(&self) -> CancellationToken {
        self.lifecycle.token()
    }

    /// Number of executions currently in flight.
    pub fn active_sessions(&self) -> usize {
        lock(&self.tracked).live.len()
    }

    /// The executor every execution runs through.
    pub fn executor(&self) -> &RetryExecutor<E> {
        &self.executor
    }
}

impl<E> Drop for LifecycleBoundRetrySession<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<E> fmt::Debug for LifecycleBoundRetrySession<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleBoundRetrySession")
            .field("executor", &self.executor)
            .field("torn_down", &self.is_torn_down())
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}

/// Untracks and cancels one execution's source when the execution ends,
/// including when its future is dropped or its operation panics.
struct SessionGuard<'a> {
    tracked: &'a Mutex<Tracked>,
    id: u64,
    source: CancellationSource,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let removed = { lock(self.tracked).live.remove(&self.id) };
        drop(removed);
        self.source.cancel();
    }
}

fn lock(tracked: &Mutex<Tracked>) -> MutexGuard<'_, Tracked> {
    tracked.lock().unwrap_or_else(PoisonError::into_inner)
}
