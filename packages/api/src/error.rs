//! Error types for identity-provider calls

use std::time::Duration;

use thiserror::Error;

/// Failure of an authentication operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    /// The provider refused the request (bad credentials, unconfirmed email,
    /// expired refresh token). The message is meant to be shown verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The provider could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not finish within the configured bound.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with something we could not decode.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The operation needs a session and there is none.
    #[error("Not signed in")]
    NotSignedIn,

    /// A deep link could not be used to resume an auth flow.
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Persisting or reading the local session failed.
    #[error("Session storage error: {0}")]
    Storage(String),

    /// Missing or malformed backend configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Network(_) | AuthError::Timeout(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::InvalidResponse(err.to_string())
        } else {
            AuthError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::InvalidResponse(err.to_string())
    }
}

/// Result type for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;
