//! Error types for the catalog fetch layer.
//!
//! Errors are `Clone` because a single in-flight fetch hands the same outcome
//! to every caller that joined it.

use thiserror::Error;

use crate::constants::HTTP_TOO_MANY_REQUESTS;

/// Result type alias using `FetchError`.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Main error type for all fetch-layer operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    // ═══════════════════════════════════════════════════════════════════════════
    // UPSTREAM ERRORS (retryable)
    // ═══════════════════════════════════════════════════════════════════════════

    /// Upstream answered 429.
    #[error("Rate limited by upstream (HTTP 429)")]
    RateLimited,

    /// Upstream answered with a non-2xx status other than 429.
    #[error("Upstream error: HTTP {status}")]
    Upstream { status: u16 },

    /// Network, DNS, timeout or body decoding failure.
    #[error("Transport failure: {0}")]
    Transport(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // TERMINAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Attempt budget exhausted.
    #[error("Gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        last: Box<FetchError>,
    },

    // ═══════════════════════════════════════════════════════════════════════════
    // CACHE ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// A persisted entry could not be parsed. Treated as a miss by readers.
    #[error("Corrupt cache entry '{key}': {reason}")]
    CacheCorrupt { key: String, reason: String },

    /// Persisting the cache failed.
    #[error("Storage error: {0}")]
    Storage(String),

    // ═══════════════════════════════════════════════════════════════════════════
    // SETUP / INTERNAL ERRORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The queue's drain worker is gone.
    #[error("Request queue closed")]
    QueueClosed,

    /// Internal invariant violation (should never happen).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FetchError {
    /// Maps an HTTP status to the matching upstream error.
    pub fn from_status(status: u16) -> Self {
        if status == HTTP_TOO_MANY_REQUESTS {
            FetchError::RateLimited
        } else {
            FetchError::Upstream { status }
        }
    }

    /// Returns the upstream HTTP status behind this error, if any.
    ///
    /// Looks through `MaxRetriesExceeded` to the last attempt's cause.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            FetchError::RateLimited => Some(HTTP_TOO_MANY_REQUESTS),
            FetchError::Upstream { status } => Some(*status),
            FetchError::MaxRetriesExceeded { last, .. } => last.upstream_status(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Storage(format!("JSON: {err}"))
    }
}
