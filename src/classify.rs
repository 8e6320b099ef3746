//! Normalized error descriptions.
//!
//! The retry executor never looks at an operation's concrete error type. A
//! classifier maps each raw error to a [`NormalizedError`], and retry
//! decisions are made on that alone. Which HTTP statuses or transport
//! failures map to which [`ErrorKind`] is the classifier's business.
//!
//! # Examples
//!
//! ```rust
//! use steadfast::{Classify, ErrorKind, NormalizedError};
//!
//! #[derive(Debug)]
//! enum ApiError {
//!     Status(u16),
//!     Dns,
//! }
//!
//! impl Classify for ApiError {
//!     fn classify(&self) -> NormalizedError {
//!         match self {
//!             ApiError::Status(code @ 500..=599) => {
//!                 NormalizedError::server(format!("upstream returned {code}")).with_status(*code)
//!             }
//!             ApiError::Status(code) => {
//!                 NormalizedError::client(format!("request rejected with {code}")).with_status(*code)
//!             }
//!             ApiError::Dns => NormalizedError::network("dns lookup failed"),
//!         }
//!     }
//! }
//!
//! let normalized = ApiError::Status(503).classify();
//! assert_eq!(normalized.kind(), ErrorKind::Server);
//! assert!(normalized.retryable_hint());
//! assert!(!ApiError::Status(404).classify().retryable_hint());
//! ```

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Connection refused, reset, DNS failure and the like.
    Network,
    /// The operation (or something it called) timed out.
    Timeout,
    /// The remote side failed (5xx class).
    Server,
    /// The request itself was rejected (4xx class, validation).
    Client,
    /// The operation observed cancellation and stopped.
    Abort,
    /// Anything the classifier could not place.
    Unknown,
}

impl ErrorKind {
    /// Kinds that are worth retrying by default: network, timeout, server.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server)
    }

    /// Lowercase name, as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::Abort => "abort",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classifier's verdict on a single failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NormalizedError {
    kind: ErrorKind,
    message: String,
    retryable_hint: bool,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    status_code: Option<u16>,
}

impl NormalizedError {
    /// Create an error of `kind`.
    ///
    /// The retryable hint defaults to [`ErrorKind::is_transient`].
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable_hint: kind.is_transient(),
            status_code: None,
        }
    }

    /// A network-class error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// A timeout-class error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// A server-class error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    /// A client-class error.
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client, message)
    }

    /// An abort: the operation stopped because it was canceled.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Abort, message)
    }

    /// An unclassified error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Attach the status code that produced this error.
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Override the retryable hint.
    pub fn with_retryable_hint(mut self, retryable: bool) -> Self {
        self.retryable_hint = retryable;
        self
    }

    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The classifier's opinion on whether a retry could help.
    pub fn retryable_hint(&self) -> bool {
        self.retryable_hint
    }

    /// Status code, when the failure carried one.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Returns true for [`ErrorKind::Abort`].
    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::Abort
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} error ({}): {}", self.kind, code, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for NormalizedError {}

/// Errors that know how to describe themselves to the retry executor.
///
/// Implement this for an operation's error type to use
/// [`RetryExecutor::new`](crate::RetryExecutor::new) and
/// [`execute_with_retry`](crate::execute_with_retry). Error types that can't
/// implement it (foreign types) can be given a classifier closure through
/// [`RetryExecutor::with_classifier`](crate::RetryExecutor::with_classifier)
/// instead.
pub trait Classify {
    /// Describe this error.
    fn classify(&self) -> NormalizedError;
}

impl Classify for NormalizedError {
    fn classify(&self) -> NormalizedError {
        self.clone()
    }
}
