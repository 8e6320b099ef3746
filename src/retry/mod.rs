//! Bounded, cancellation-aware retries.
//!
//! - **Policy is data**: [`RetryPolicy`] holds the attempt budget, the
//!   backoff bounds and the retry predicate, and can be validated up front
//! - **Classification is injected**: the executor only sees
//!   [`NormalizedError`](crate::NormalizedError)s, never the operation's own
//!   error type
//! - **Cancellation is cooperative**: checked before the first attempt, after
//!   each failure, and during each backoff sleep
//!
//! # Quick Start
//!
//! ```rust
//! use steadfast::cancel::CancellationSource;
//! use steadfast::{NormalizedError, RetryExecutor, RetryPolicy};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
//! let executor = RetryExecutor::<NormalizedError>::new(policy)
//!     .named("post_sale")
//!     .on_attempt(|record| eprintln!("attempt {} failed: {}", record.attempt_number, record.error));
//!
//! let source = CancellationSource::new();
//! let receipt = executor
//!     .execute(|_token| async { Ok::<_, NormalizedError>(42) }, &source.token())
//!     .await;
//!
//! assert_eq!(receipt, Ok(42));
//! # });
//! ```
//!
//! # Outcomes
//!
//! - `Ok(value)`: some attempt succeeded
//! - [`RetryError::GaveUp`]: the last failure was not retryable, or the
//!   attempt budget ran out; carries only the final error
//! - [`RetryError::Aborted`]: cancellation won

mod error;
mod executor;
mod policy;

pub use error::{GiveUpReason, PolicyError, RetryError, RetryExhausted};
pub use executor::{execute_with_retry, RetryExecutor};
pub use policy::{AttemptRecord, RetryPolicy, RetryPredicate};
