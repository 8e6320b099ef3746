//! Per-attempt telemetry.
//!
//! A [`TelemetrySink`] receives one [`AttemptTelemetry`] for every failed
//! attempt, for feeding dashboards or metrics. The executor stores nothing
//! itself. Closures work as sinks:
//!
//! ```rust
//! use steadfast::telemetry::AttemptTelemetry;
//! use steadfast::{NormalizedError, RetryExecutor, RetryPolicy};
//!
//! let executor = RetryExecutor::<NormalizedError>::new(RetryPolicy::default())
//!     .named("sync_inventory")
//!     .with_telemetry(|event: &AttemptTelemetry<'_>| {
//!         println!("{} attempt {} failed: {}", event.operation, event.attempt, event.message);
//!     });
//! # let _ = executor;
//! ```

use crate::classify::ErrorKind;

/// What a sink learns about one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTelemetry<'a> {
    /// The executor's operation name.
    pub operation: &'a str,
    /// Which attempt failed (1-indexed).
    pub attempt: u32,
    /// Status code carried by the failure, if any.
    pub status_code: Option<u16>,
    /// Whether the policy considered the failure retryable.
    pub retryable: bool,
    /// The classified failure's kind.
    pub kind: ErrorKind,
    /// The classified failure's message.
    pub message: &'a str,
}

/// Receives per-attempt telemetry.
///
/// `record` is called on the executing task and must not block.
pub trait TelemetrySink: Send + Sync {
    /// Record one failed attempt.
    fn record(&self, event: &AttemptTelemetry<'_>);
}

impl<F> TelemetrySink for F
where
    F: Fn(&AttemptTelemetry<'_>) + Send + Sync,
{
    fn record(&self, event: &AttemptTelemetry<'_>) {
        self(event)
    }
}

/// A sink that emits each attempt as a `tracing` event.
///
/// Events go to the `steadfast::telemetry` target at `INFO`, with the
/// attempt's fields as structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: &AttemptTelemetry<'_>) {
        tracing::info!(
            target: "steadfast::telemetry",
            operation = event.operation,
            attempt = event.attempt,
            status_code = ?event.status_code,
            retryable = event.retryable,
            kind = event.kind.as_str(),
            message = event.message,
            "attempt failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn event() -> AttemptTelemetry<'static> {
        AttemptTelemetry {
            operation: "create_invoice",
            attempt: 2,
            status_code: Some(503),
            retryable: true,
            kind: ErrorKind::Server,
            message: "service unavailable",
        }
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: &AttemptTelemetry<'_>| {
            seen.lock().unwrap().push((event.attempt, event.status_code));
        };

        sink.record(&event());

        assert_eq!(*seen.lock().unwrap(), vec![(2, Some(503))]);
    }

    #[traced_test]
    #[test]
    fn tracing_sink_logs_fields() {
        TracingSink.record(&event());

        assert!(logs_contain("attempt failed"));
        assert!(logs_contain("create_invoice"));
        assert!(logs_contain("service unavailable"));
    }
}
