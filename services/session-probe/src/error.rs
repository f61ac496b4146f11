//! Probe-specific error types

use thiserror::Error;

/// Failures before or during a probe command.
///
/// HTTP-level results (401s, 5xx, connection expiry) are not errors here;
/// they are reported as a `Report` with `ok: false`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported HTTP method: {0}")]
    InvalidMethod(String),

    #[error("request body is not valid JSON: {0}")]
    InvalidBody(String),

    #[error(transparent)]
    Client(#[from] backend_client::Error),
}

/// Result alias using probe Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert_eq!(
            Error::InvalidMethod("FETCH".into()).to_string(),
            "unsupported HTTP method: FETCH"
        );
        assert!(
            Error::InvalidBody("expected value at line 1".into())
                .to_string()
                .contains("line 1")
        );
    }

    #[test]
    fn client_error_is_transparent() {
        let err: Error = backend_client::Error::Network {
            message: "connection refused".into(),
            timed_out: false,
        }
        .into();
        assert_eq!(err.to_string(), "network error: connection refused");
    }
}
