//! Canonical result of a validated backend response

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Third-party calendar whose OAuth connection can expire independently of
/// the app session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CalendarProvider {
    Google,
    Microsoft,
    Other(String),
}

impl CalendarProvider {
    /// Parse the backend's `provider` field. Case-insensitive; blank is None.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => None,
            "google" => Some(Self::Google),
            "microsoft" | "outlook" => Some(Self::Microsoft),
            _ => Some(Self::Other(normalized)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for CalendarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single HTTP response reduces to. Exactly one variant per response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Success {
        status: u16,
        body: Bytes,
    },
    /// The session token was refreshed. Re-issue the original request once.
    RetryWithNewToken,
    /// Session is over; a `ForceSignOut` event has been published.
    SessionExpired,
    /// A linked calendar needs reconnecting. The session is unaffected.
    ConnectionExpired {
        provider: CalendarProvider,
    },
    /// Server-declared transient failure. Retry policy is the caller's.
    TransientFailure {
        retryable: bool,
        message: String,
    },
    HttpError {
        status: u16,
        message: String,
        /// Raw response body
        details: String,
    },
}

impl ResponseOutcome {
    /// Metrics/logging label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::RetryWithNewToken => "retry_with_new_token",
            Self::SessionExpired => "session_expired",
            Self::ConnectionExpired { .. } => "connection_expired",
            Self::TransientFailure { .. } => "transient_failure",
            Self::HttpError { .. } => "http_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Decode a `Success` body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Self::Success { body, .. } => serde_json::from_slice(body)
                .map_err(|e| Error::Body(format!("decoding response body: {e}"))),
            other => Err(Error::Body(format!(
                "expected a successful response, got {}",
                other.label()
            ))),
        }
    }
}
