//! Retry settings as plain, deserializable data.
//!
//! [`RetryConfig`] is the shape retry settings take in configuration files.
//! It holds only numbers; turning it into a [`RetryPolicy`] validates it.
//!
//! With the `serde` feature enabled it deserializes from any serde format:
//!
//! ```rust,ignore
//! use steadfast::RetryConfig;
//!
//! let config: RetryConfig = serde_json::from_str(
//!     r#"{ "attempts": 5, "base_delay_ms": 250, "max_delay_ms": 4000 }"#,
//! )?;
//! let policy = config.into_policy()?;
//! ```

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::retry::{PolicyError, RetryPolicy};

/// Retry settings, in whole milliseconds.
///
/// Missing fields take their [`Default`] values: 3 attempts, 100ms base
/// delay, 1000ms cap.
///
/// # Examples
///
/// ```rust
/// use steadfast::RetryConfig;
/// use std::time::Duration;
///
/// let policy = RetryConfig {
///     attempts: 4,
///     ..RetryConfig::default()
/// }
/// .into_policy()
/// .unwrap();
///
/// assert_eq!(policy.attempts(), 4);
/// assert_eq!(policy.base_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay ceiling for the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Build a validated policy with the default retry predicate.
    pub fn into_policy(self) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::try_new(
            self.attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl TryFrom<RetryConfig> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(config: RetryConfig) -> Result<Self, Self::Error> {
        config.into_policy()
    }
}

impl From<&RetryPolicy> for RetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            attempts: policy.attempts(),
            base_delay_ms: millis(policy.base_delay()),
            max_delay_ms: millis(policy.max_delay()),
        }
    }
}
