//! Error types for session credential operations

/// Errors from token storage and auth endpoint calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure: no HTTP response was received.
    #[error("HTTP request failed: {message}")]
    Http { message: String, timed_out: bool },

    #[error("token refresh failed: {0}")]
    TokenExchange(String),

    /// The backend refused the refresh token itself (401/403).
    #[error("refresh token rejected ({status}): {body}")]
    InvalidCredentials { status: u16, body: String },

    #[error("logout failed: {0}")]
    Logout(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias for session credential operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn transport(action: &str, err: reqwest::Error) -> Self {
        Self::Http {
            timed_out: err.is_timeout(),
            message: format!("{action} request failed: {err}"),
        }
    }
}
