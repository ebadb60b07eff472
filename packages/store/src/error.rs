//! Error type shared by every profile / detail store backend.

use std::time::Duration;

use thiserror::Error;

/// Failure talking to a remote table.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store could not be reached (connection refused, DNS, 5xx).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete within the configured bound.
    #[error("store request timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered and refused the request.
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The store answered with something we could not decode.
    #[error("invalid store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Whether a read that failed this way is worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }

    /// Row-level security or credential failures.
    pub fn is_authorization(&self) -> bool {
        matches!(self, StoreError::Rejected { status: 401 | 403, .. })
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
