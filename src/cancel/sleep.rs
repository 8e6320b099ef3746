//! A sleep that wakes early on cancellation.

use std::time::Duration;

use super::source::CancellationToken;

/// How an interruptible [`sleep`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full delay elapsed.
    Elapsed,
    /// The token canceled before the delay elapsed.
    Canceled,
}

impl SleepOutcome {
    /// Returns true if the sleep was cut short by cancellation.
    pub fn is_canceled(self) -> bool {
        matches!(self, SleepOutcome::Canceled)
    }
}

/// Sleep for `delay`, or until `token` cancels, whichever comes first.
///
/// Whichever branch loses is dropped before this returns, so neither the
/// timer nor the cancellation waiter outlives the call.
///
/// # Examples
///
/// ```rust
/// use steadfast::cancel::{sleep, CancellationSource, SleepOutcome};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let source = CancellationSource::new();
/// source.cancel();
///
/// let outcome = sleep(Duration::from_secs(60), &source.token()).await;
/// assert_eq!(outcome, SleepOutcome::Canceled);
/// # });
/// ```
pub async fn sleep(delay: Duration, token: &CancellationToken) -> SleepOutcome {
    if token.is_canceled() {
        return SleepOutcome::Canceled;
    }

    tokio::select! {
        biased;
        () = token.cancelled() => SleepOutcome::Canceled,
        () = tokio::time::sleep(delay) => SleepOutcome::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationSource;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn sleeps_full_delay_when_live() {
        let source = CancellationSource::new();
        let start = Instant::now();

        let outcome = sleep(Duration::from_millis(200), &source.token()).await;

        assert_eq!(outcome, SleepOutcome::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(source.token().listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wakes_early_on_cancel() {
        let source = CancellationSource::new();
        let _timer = source.cancel_after(Duration::from_millis(50));
        let start = Instant::now();

        let outcome = sleep(Duration::from_millis(500), &source.token()).await;

        assert!(outcome.is_canceled());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(60));
        assert_eq!(source.token().listener_count(), 0);
    }

    #[tokio::test]
    async fn zero_delay_elapses() {
        let outcome = sleep(Duration::ZERO, &CancellationToken::never()).await;
        assert_eq!(outcome, SleepOutcome::Elapsed);
    }
}
