//! Error types for the authenticated client
//!
//! Only failures that never produced a classifiable HTTP response end up
//! here. Every HTTP response, including 4xx/5xx, is a `ResponseOutcome`.

/// Errors from sending a request through the authenticated client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// DNS, connect, TLS, timeout or body read failure. Not retried.
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("token store error: {0}")]
    Store(#[from] session_auth::Error),

    #[error("unexpected response: {0}")]
    Body(String),
}

impl Error {
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        Self::Network {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }

    /// Whether this is a transport timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Network { timed_out: true, .. })
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
