//! Exponential backoff with full jitter.
//!
//! The delay before retrying after attempt `n` (1-indexed) is drawn uniformly
//! from `[0, min(max, base * 2^(n-1))]`. Drawing from the whole range spreads
//! concurrent retriers out instead of letting them wake in lockstep.
//!
//! # Examples
//!
//! ```rust
//! use steadfast::backoff::{backoff_delay, capped_delay};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use std::time::Duration;
//!
//! let base = Duration::from_millis(100);
//! let max = Duration::from_secs(1);
//!
//! assert_eq!(capped_delay(1, base, max), Duration::from_millis(100));
//! assert_eq!(capped_delay(3, base, max), Duration::from_millis(400));
//! assert_eq!(capped_delay(10, base, max), max);
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let delay = backoff_delay(3, base, max, &mut rng);
//! assert!(delay <= Duration::from_millis(400));
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The jitter ceiling for `attempt`: `min(max, base * 2^(attempt-1))`.
///
/// # Panics
///
/// Panics if `attempt` is zero. Attempt numbers start at 1.
pub fn capped_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    assert!(attempt >= 1, "attempt numbers start at 1, got {attempt}");
    // Overflow of the shift or the product means the exponential is past
    // any `Duration`, so past `max` too.
    let exponential = 1u128
        .checked_shl(attempt - 1)
        .and_then(|factor| base.as_nanos().checked_mul(factor));
    match exponential {
        Some(nanos) if nanos < max.as_nanos() => duration_from_nanos(nanos),
        _ => max,
    }
}

/// `nanos` is below some `Duration::as_nanos()`, so it fits.
fn duration_from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}

/// Full-jitter backoff delay for `attempt`, drawn from `rng`.
///
/// The result is uniform over `[0, capped_delay(attempt, base, max)]` at
/// nanosecond resolution.
///
/// # Panics
///
/// Panics if `attempt` is zero.
pub fn backoff_delay<R>(attempt: u32, base: Duration, max: Duration, rng: &mut R) -> Duration
where
    R: Rng + ?Sized,
{
    let ceiling = capped_delay(attempt, base, max);
    let ceiling_nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
    if ceiling_nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rng.random_range(0..=ceiling_nanos))
}

/// Where the randomness for backoff jitter comes from.
///
/// Production code uses [`JitterSource::Thread`]. Tests swap in
/// [`JitterSource::seeded`] for reproducible delays, or
/// [`JitterSource::Disabled`] to sleep the full capped delay every time.
#[derive(Clone, Default)]
pub enum JitterSource {
    /// rand's thread-local generator.
    #[default]
    Thread,
    /// A seeded generator shared by every execution using this source.
    Seeded(Arc<Mutex<StdRng>>),
    /// A caller-supplied function from the capped delay to the jittered one.
    ///
    /// Results above the cap are clamped to it.
    Custom(Arc<dyn Fn(Duration) -> Duration + Send + Sync>),
    /// No jitter: always the capped delay.
    Disabled,
}

impl JitterSource {
    /// A deterministic source seeded with `seed`.
    pub fn seeded(seed: u64) -> Self {
        JitterSource::Seeded(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))))
    }

    /// A source backed by `f`.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Duration) -> Duration + Send + Sync + 'static,
    {
        JitterSource::Custom(Arc::new(f))
    }

    /// The delay to sleep after failed attempt `attempt`.
    ///
    /// # Panics
    ///
    /// Panics if `attempt` is zero.
    pub fn delay(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        match self {
            JitterSource::Thread => backoff_delay(attempt, base, max, &mut rand::rng()),
            JitterSource::Seeded(rng) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                backoff_delay(attempt, base, max, &mut *rng)
            }
            JitterSource::Custom(f) => {
                let ceiling = capped_delay(attempt, base, max);
                f(ceiling).min(ceiling)
            }
            JitterSource::Disabled => capped_delay(attempt, base, max),
        }
    }
}

impl fmt::Debug for JitterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitterSource::Thread => f.write_str("Thread"),
            JitterSource::Seeded(_) => f.write_str("Seeded"),
            JitterSource::Custom(_) => f.write_str("Custom"),
            JitterSource::Disabled => f.write_str("Disabled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(1000);

    #[test]
    fn capped_delay_doubles_then_caps() {
        assert_eq!(capped_delay(1, BASE, MAX), Duration::from_millis(100));
        assert_eq!(capped_delay(2, BASE, MAX), Duration::from_millis(200));
        assert_eq!(capped_delay(3, BASE, MAX), Duration::from_millis(400));
        assert_eq!(capped_delay(4, BASE, MAX), Duration::from_millis(800));
        assert_eq!(capped_delay(5, BASE, MAX), MAX);
        assert_eq!(capped_delay(40, BASE, MAX), MAX);
        assert_eq!(capped_delay(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn capped_delay_keeps_doubling_past_32_attempts() {
        let base = Duration::from_nanos(1);
        let max = Duration::from_secs(5);

        assert_eq!(capped_delay(33, base, max), Duration::from_nanos(1 << 32));
        assert_eq!(capped_delay(34, base, max), max);
        assert_eq!(
            capped_delay(40, base, Duration::from_secs(3600)),
            Duration::from_nanos(1 << 39)
        );
        assert_eq!(capped_delay(128, base, max), max);
        assert_eq!(capped_delay(u32::MAX, base, Duration::MAX), Duration::MAX);
    }

    #[test]
    #[should_panic(expected = "attempt numbers start at 1")]
    fn attempt_zero_is_a_programmer_error() {
        capped_delay(0, BASE, MAX);
    }

    #[test]
    fn seeded_sources_are_reproducible() {
        let a = JitterSource::seeded(42);
        let b = JitterSource::seeded(42);

        for attempt in 1..10 {
            assert_eq!(a.delay(attempt, BASE, MAX), b.delay(attempt, BASE, MAX));
        }
    }

    #[test]
    fn thread_jitter_stays_in_bounds() {
        let jitter = JitterSource::Thread;
        for attempt in 1..20 {
            let delay = jitter.delay(attempt, BASE, MAX);
            assert!(delay <= capped_delay(attempt, BASE, MAX));
        }
    }

    #[test]
    fn disabled_jitter_returns_ceiling() {
        let jitter = JitterSource::Disabled;
        assert_eq!(jitter.delay(2, BASE, MAX), Duration::from_millis(200));
    }

    #[test]
    fn custom_jitter_is_clamped() {
        let jitter = JitterSource::custom(|ceiling| ceiling * 10);
        assert_eq!(jitter.delay(1, BASE, MAX), BASE);

        let half = JitterSource::custom(|ceiling| ceiling / 2);
        assert_eq!(half.delay(2, BASE, MAX), Duration::from_millis(100));
    }

    #[test]
    fn zero_ceiling_yields_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            backoff_delay(3, Duration::ZERO, MAX, &mut rng),
            Duration::ZERO
        );
    }

    #[test]
    fn jitter_source_debug() {
        assert_eq!(format!("{:?}", JitterSource::seeded(1)), "Seeded");
        assert_eq!(format!("{:?}", JitterSource::default()), "Thread");
    }
}
