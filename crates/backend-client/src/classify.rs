//! Response classification
//!
//! Reduces a status code, the endpoint kind and the raw body to exactly one
//! `Classification`. Pure and side-effect free; the client attaches refresh
//! and event publishing to the result.
//!
//! Error bodies come in two shapes and both must classify identically:
//! - structured: `{"error":"token_expired"|"transient_failure","provider":..,"retryable":..,"message":..}`
//! - legacy free text: `{"error"|"message":"...","provider":..,"action_required":..}`
//!
//! Body parsing is lenient: malformed JSON, non-string fields or an empty
//! body simply yield no signal.

use reqwest::StatusCode;
use serde_json::Value;

use crate::config::EndpointKind;
use crate::outcome::CalendarProvider;

/// Structured discriminator for a linked calendar's OAuth token expiring.
const TOKEN_EXPIRED: &str = "token_expired";

/// Structured discriminator for a server-declared transient failure.
const TRANSIENT_FAILURE: &str = "transient_failure";

/// Legacy phrases meaning "the calendar connection needs reconnecting".
/// Matched case-insensitively against `message` and `error`.
const CONNECTION_EXPIRY_PATTERNS: &[&str] = &[
    "calendar token expired",
    "calendar connection expired",
    "reconnect calendar",
    "reconnect your calendar",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// 401 from the refresh endpoint: the refresh token is invalid.
    RefreshRejected,
    /// 401 with a calendar-connection expiry body. Not a session problem.
    ConnectionExpired(CalendarProvider),
    /// Any other 401: the session token needs refreshing.
    SessionExpired,
    TransientFailure {
        retryable: bool,
        message: String,
    },
    HttpError {
        message: String,
    },
}

/// Fields of an error body the classifier cares about.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub provider: Option<String>,
    pub retryable: Option<bool>,
    pub action_required: Option<String>,
}

impl ErrorBody {
    /// Extract known fields from a JSON object body. Anything else is empty.
    pub fn parse(body: &[u8]) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let text = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            error: text("error"),
            message: text("message"),
            provider: text("provider"),
            retryable: map.get("retryable").and_then(Value::as_bool),
            action_required: text("action_required"),
        }
    }

    /// Best human-readable message: `message`, then `error`.
    pub fn display_message(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }

    fn has_discriminator(&self, discriminator: &str) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(discriminator))
    }

    fn mentions_reconnect(&self) -> bool {
        let text_matches = [self.message.as_deref(), self.error.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_lowercase)
            .any(|text| CONNECTION_EXPIRY_PATTERNS.iter().any(|p| text.contains(p)));
        let action_matches = self
            .action_required
            .as_deref()
            .is_some_and(|a| a.to_lowercase().contains("reconnect"));
        text_matches || action_matches
    }
}

/// What an error body says, independent of status code.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ErrorSignal {
    ConnectionExpired(CalendarProvider),
    TransientFailure {
        retryable: bool,
        message: Option<String>,
    },
    Unrecognized,
}

impl ErrorSignal {
    /// Ordered matcher: structured discriminators first, then the legacy
    /// text scan. Connection expiry always requires a provider.
    fn from_body(body: &ErrorBody) -> Self {
        let provider = body.provider.as_deref().and_then(CalendarProvider::parse);
        if let Some(provider) = &provider
            && body.has_discriminator(TOKEN_EXPIRED)
        {
            return Self::ConnectionExpired(provider.clone());
        }
        if body.has_discriminator(TRANSIENT_FAILURE) {
            return Self::TransientFailure {
                retryable: body.retryable.unwrap_or(false),
                message: body.message.clone(),
            };
        }
        match provider {
            Some(provider) if body.mentions_reconnect() => Self::ConnectionExpired(provider),
            _ => Self::Unrecognized,
        }
    }
}

/// Classify a response.
///
/// Fixed precedence: success > refresh-endpoint 401 > health-check 401 >
/// connection expiry > session expiry > transient failure > generic error.
pub fn classify(status: StatusCode, endpoint: EndpointKind, body: &[u8]) -> Classification {
    if status.is_success() {
        return Classification::Success;
    }

    let parsed = ErrorBody::parse(body);
    match (status.as_u16(), endpoint, ErrorSignal::from_body(&parsed)) {
        (401, EndpointKind::Refresh, _) => Classification::RefreshRejected,
        (401, EndpointKind::HealthCheck, _) => Classification::HttpError {
            message: error_message(status, &parsed),
        },
        (401, EndpointKind::Other, ErrorSignal::ConnectionExpired(provider)) => {
            Classification::ConnectionExpired(provider)
        }
        (401, EndpointKind::Other, _) => Classification::SessionExpired,
        (500, _, ErrorSignal::TransientFailure { retryable, message }) => {
            Classification::TransientFailure {
                retryable,
                message: message.unwrap_or_else(|| status_phrase(status)),
            }
        }
        _ => Classification::HttpError {
            message: error_message(status, &parsed),
        },
    }
}

/// Message for a generic HTTP error: body `message`, body `error`, then the
/// standard status phrase. Never empty.
pub fn error_message(status: StatusCode, body: &ErrorBody) -> String {
    body.display_message()
        .map(str::to_string)
        .unwrap_or_else(|| status_phrase(status))
}

fn status_phrase(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}
