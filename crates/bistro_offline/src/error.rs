//! Error types for the offline data layer.

use bistro_store::{Key, SchemaError, StoreError};
use std::fmt;
use thiserror::Error;

/// Result type for network calls.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Result type for client operations.
pub type OfflineResult<T> = Result<T, OfflineError>;

/// A failed call to the restaurant API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Connectivity is reported offline; no request was sent.
    #[error("offline")]
    Offline,

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The request could not be sent or the response not read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body was not what the API promises.
    #[error("cannot decode response: {0}")]
    Decode(String),
}

impl NetworkError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

/// A read that could be answered neither from the cache nor the network.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The cache was empty and the network read failed.
    #[error("no cached data and the network read failed: {0}")]
    Unavailable(#[source] NetworkError),

    /// A restaurant with this id does not exist.
    #[error("restaurant {0} does not exist")]
    NotFound(i64),

    /// The local store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A write the network did not confirm. The intent was durably queued and
/// will be sent again on the next replay.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteDeferred {
    /// Key of the queued record.
    pub queue_key: Key,
    /// Restaurant the write targets.
    pub restaurant_id: i64,
    /// Why the write was not confirmed.
    pub reason: NetworkError,
}

impl fmt::Display for WriteDeferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write for restaurant {} queued as {} ({})",
            self.restaurant_id, self.queue_key, self.reason
        )
    }
}

/// Errors from the offline client.
#[derive(Debug, Error)]
pub enum OfflineError {
    /// A review payload failed validation; nothing was sent or queued.
    #[error("invalid review: {0}")]
    InvalidReview(String),

    /// A read failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The schema could not be opened or migrated.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The local store failed, including failing to queue a write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl OfflineError {
    /// Creates an invalid-review error.
    pub fn invalid_review(message: impl Into<String>) -> Self {
        Self::InvalidReview(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_names_url() {
        let err = NetworkError::Status {
            status: 503,
            url: "http://localhost:1337/restaurants".into(),
        };
        assert_eq!(err.to_string(), "http://localhost:1337/restaurants returned HTTP 503");
    }

    #[test]
    fn deferred_write_describes_itself() {
        let deferred = WriteDeferred {
            queue_key: Key::from(3i64),
            restaurant_id: 7,
            reason: NetworkError::Offline,
        };
        assert_eq!(deferred.to_string(), "write for restaurant 7 queued as 3 (offline)");
    }

    #[test]
    fn store_errors_convert() {
        let err: OfflineError = StoreError::closed().into();
        assert!(matches!(err, OfflineError::Store(_)));
        let err: OfflineError = FetchError::NotFound(4).into();
        assert_eq!(err.to_string(), "restaurant 4 does not exist");
    }
}
