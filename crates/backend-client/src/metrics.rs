//! Client metrics
//!
//! Emitted through the `metrics` facade; installing a recorder is up to the
//! application. Without one these calls are no-ops.
//!
//! - `backend_responses_total` (counter): label `outcome`
//! - `session_refresh_total` (counter): label `result`
//! - `session_refresh_joined_total` (counter): callers that awaited an
//!   already in-flight refresh instead of starting one

use crate::outcome::ResponseOutcome;

pub fn record_outcome(outcome: &ResponseOutcome) {
    metrics::counter!("backend_responses_total", "outcome" => outcome.label()).increment(1);
}

pub fn record_refresh(result: &'static str) {
    metrics::counter!("session_refresh_total", "result" => result).increment(1);
}

pub fn record_refresh_joined() {
    metrics::counter!("session_refresh_joined_total").increment(1);
}
