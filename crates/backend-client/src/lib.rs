//! Authenticated client for the calendar backend
//!
//! Attaches the session bearer token to every request and reduces each
//! response to a `ResponseOutcome`. Session expiry is handled in-line:
//!
//! 1. Backend returns 401 for a normal route → single-flight token refresh
//! 2. Refresh succeeds → caller gets `RetryWithNewToken` (or `execute` retries once)
//! 3. Refresh rejected, or no refresh token → `ForceSignOut` event, `SessionExpired`
//! 4. 401 carrying a calendar-connection expiry body → `ConnectionExpired` event,
//!    session untouched
//! 5. 401 from the refresh route itself → `ForceSignOut`, never another refresh
//!
//! Events go out on the `EventBus` handed to the client at construction.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod outcome;
mod refresh;
pub mod request;

pub use classify::{Classification, ErrorBody, classify};
pub use client::AuthenticatedClient;
pub use config::{ClientConfig, EndpointKind};
pub use error::{Error, Result};
pub use events::{DEFAULT_EVENT_CAPACITY, EventBus, SessionEvent, SignOutReason};
pub use outcome::{CalendarProvider, ResponseOutcome};
pub use refresh::{RefreshFailure, RefreshResult};
pub use request::BackendRequest;
