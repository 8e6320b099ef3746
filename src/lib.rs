//! # Steadfast
//!
//! Run a fallible async operation under a bounded retry policy, with
//! full-jitter exponential backoff and cooperative cancellation composed
//! from any number of independent sources.
//!
//! ## Pieces
//!
//! - [`cancel`]: cancellation sources, tokens, composition, and a sleep that
//!   wakes early on cancellation
//! - [`backoff`]: the delay schedule, `uniform(0, min(max, base * 2^(n-1)))`
//! - [`classify`]: the [`NormalizedError`] the executor decides on
//! - [`retry`]: [`RetryPolicy`] and the [`RetryExecutor`] attempt loop
//! - [`session`]: [`LifecycleBoundRetrySession`], which cancels everything it
//!   started when its owner goes away
//! - [`telemetry`]: per-attempt events for dashboards
//!
//! ## Quick Example
//!
//! ```rust
//! use steadfast::cancel::CancellationSource;
//! use steadfast::{NormalizedError, RetryError, RetryExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let executor = RetryExecutor::<NormalizedError>::new(RetryPolicy::new(
//!     3,
//!     Duration::from_millis(1),
//!     Duration::from_millis(10),
//! ))
//! .named("submit_order")
//! .on_give_up(|error| eprintln!("giving up: {error}"));
//!
//! let shutdown = CancellationSource::new();
//! let result: Result<(), _> = executor
//!     .execute(
//!         |_token| async { Err(NormalizedError::client("card declined").with_status(402)) },
//!         &shutdown.token(),
//!     )
//!     .await;
//!
//! match result {
//!     Err(RetryError::GaveUp(exhausted)) => {
//!         assert_eq!(exhausted.attempts, 1);
//!         assert_eq!(exhausted.normalized.status_code(), Some(402));
//!     }
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backoff;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod testing;

// Re-exports
pub use backoff::{backoff_delay, JitterSource};
pub use cancel::{compose, CancellationSource, CancellationToken, CompositeCancellation};
pub use classify::{Classify, ErrorKind, NormalizedError};
pub use config::RetryConfig;
pub use retry::{
    execute_with_retry, AttemptRecord, GiveUpReason, PolicyError, RetryError, RetryExecutor,
    RetryExhausted, RetryPolicy,
};
pub use session::LifecycleBoundRetrySession;
pub use telemetry::{AttemptTelemetry, TelemetrySink, TracingSink};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancel::{compose, CancellationSource, CancellationToken};
    pub use crate::classify::{Classify, ErrorKind, NormalizedError};
    pub use crate::retry::{execute_with_retry, RetryError, RetryExecutor, RetryPolicy};
    pub use crate::session::LifecycleBoundRetrySession;
}
