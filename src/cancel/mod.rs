//! Cooperative cancellation primitives.
//!
//! Cancellation here is always cooperative: nothing is preempted. A
//! [`CancellationSource`] owns the right to cancel, and hands out read-only
//! [`CancellationToken`]s that code can poll, await, or attach listeners to.
//!
//! # Quick Start
//!
//! ```rust
//! use steadfast::cancel::{compose, CancellationSource};
//!
//! let request = CancellationSource::new();
//! let lifecycle = CancellationSource::new();
//!
//! let composite = compose([&request.token(), &lifecycle.token()]);
//! assert!(!composite.is_canceled());
//!
//! lifecycle.cancel();
//! assert!(composite.is_canceled());
//! // Propagation is inward only.
//! assert!(!request.is_canceled());
//! ```
//!
//! # Pieces
//!
//! - [`CancellationSource`] / [`CancellationToken`]: a one-way canceled flag
//!   plus listeners
//! - [`compose`]: derive one token from many, deregistering listeners as soon
//!   as the composite settles or is dropped
//! - [`sleep`]: a timer that resolves early when a token cancels

mod composite;
mod sleep;
mod source;

pub use composite::{compose, CompositeCancellation};
pub use sleep::{sleep, SleepOutcome};
pub use source::{CancelTimer, CancellationSource, CancellationToken, Registration};
