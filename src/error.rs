//! Error types for the breaker, the cache adapter and the access service.

use std::time::Duration;

use thiserror::Error;

/// Result type for circuit breaker operations.
pub type BreakerResult<T, E> = Result<T, BreakerError<E>>;

/// Error returned by [`CircuitBreaker::call`](crate::CircuitBreaker::call).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the guarded operation was not attempted.
    #[error("circuit breaker '{breaker}' is open")]
    Open {
        /// Name of the breaker that rejected the call.
        breaker: String,
    },

    /// The guarded operation was attempted and did not succeed in time.
    #[error(transparent)]
    Upstream(#[from] UpstreamError<E>),
}

impl<E> BreakerError<E> {
    /// Returns true when the call was rejected without being attempted.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Failure of an operation that the breaker let through.
///
/// Every variant counts as a failure in the breaker's rolling window.
#[derive(Debug, Error)]
pub enum UpstreamError<E> {
    /// The operation returned an error.
    #[error("operation failed: {0}")]
    Failed(#[source] E),

    /// The operation did not finish within the per-call timeout. It may
    /// still complete in the background; its result is discarded.
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    /// The task running the operation panicked or was cancelled.
    #[error("operation aborted: {0}")]
    Aborted(String),
}

/// Failure reaching the shared cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Transport-level failure: connection refused, reset, injected fault.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A cached value could not be encoded or decoded.
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A collection whose ids or counters cannot be trusted.
///
/// Raised while decoding a cached copy, so the entry is treated like any
/// other undecodable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    /// An id, `lastInsertedID` or `revision` is outside the accepted range.
    #[error("{field} {value} is outside 1..={max}")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// Offending value.
        value: u64,
        /// Largest accepted value.
        max: u64,
    },

    /// An item is stored under a key other than its id.
    #[error("item {id} is stored under key {key}")]
    KeyMismatch {
        /// Map key.
        key: u64,
        /// Id of the item.
        id: u64,
    },
}

/// Invalid input supplied by the caller. The only error the access service
/// surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Content was empty or whitespace only.
    #[error("todo content must not be empty")]
    EmptyContent,

    /// Content exceeded the configured maximum length (in characters).
    #[error("todo content is {len} characters long, the maximum is {max}")]
    ContentTooLong {
        /// Length of the rejected content.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Todo ids are positive integers.
    #[error("invalid todo id {0}")]
    InvalidId(u64),
}

/// Failure loading or validating configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The layered configuration could not be built or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value was out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
