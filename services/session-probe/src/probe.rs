//! Probe command execution
//!
//! Runs one command against the authenticated client and condenses the
//! outcome into a `Report` for stdout. Session events published while the
//! command ran are logged afterwards.

use std::time::Duration;

use backend_client::{
    AuthenticatedClient, BackendRequest, RefreshResult, ResponseOutcome, SessionEvent,
};
use reqwest::Method;
use serde::Serialize;
use session_auth::Credentials;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::cli::{Command, RequestArgs};
use crate::error::{Error, Result};

/// Printed to stdout after a command.
#[derive(Debug, Serialize, PartialEq)]
pub struct Report {
    pub command: &'static str,
    pub ok: bool,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Report {
    fn new(command: &'static str, ok: bool, result: &'static str) -> Self {
        Self {
            command,
            ok,
            result,
            status: None,
            retryable: None,
            message: None,
            body: None,
        }
    }

    fn from_outcome(outcome: ResponseOutcome) -> Self {
        let mut report = Self::new("request", outcome.is_success(), outcome.label());
        match outcome {
            ResponseOutcome::Success { status, body } => {
                report.status = Some(status);
                report.body = body_value(&body);
            }
            ResponseOutcome::RetryWithNewToken => {}
            ResponseOutcome::SessionExpired => {
                report.message = Some("session ended, sign in again".into());
            }
            ResponseOutcome::ConnectionExpired { provider } => {
                report.message = Some(format!("reconnect the {provider} calendar"));
            }
            ResponseOutcome::TransientFailure { retryable, message } => {
                report.retryable = Some(retryable);
                report.message = Some(message);
            }
            ResponseOutcome::HttpError {
                status,
                message,
                details,
            } => {
                report.status = Some(status);
                report.message = Some(message);
                report.body = body_value(details.as_bytes());
            }
        }
        report
    }

    fn from_refresh(result: RefreshResult) -> Self {
        match result {
            RefreshResult::Refreshed => Self::new("refresh", true, "refreshed"),
            RefreshResult::Failed(failure) => {
                let mut report = Self::new("refresh", false, "refresh_failed");
                report.message = Some(failure.to_string());
                report
            }
        }
    }
}

/// JSON if the body parses as JSON, a string otherwise, nothing if empty.
fn body_value(body: &[u8]) -> Option<serde_json::Value> {
    if body.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(body)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into())),
    )
}

pub async fn run(client: &AuthenticatedClient, command: Command) -> Result<Report> {
    match command {
        Command::SignIn(args) => {
            client
                .sign_in(Credentials::new(args.access_token, args.refresh_token))
                .await?;
            Ok(Report::new("sign-in", true, "signed_in"))
        }
        Command::Request(args) => {
            let request = build_request(client, args)?;
            let outcome = client.execute(&request).await?;
            Ok(Report::from_outcome(outcome))
        }
        Command::Refresh => Ok(Report::from_refresh(client.refresh().await)),
        Command::SignOut => {
            client.sign_out().await?;
            Ok(Report::new("sign-out", true, "signed_out"))
        }
    }
}

fn build_request(client: &AuthenticatedClient, args: RequestArgs) -> Result<BackendRequest> {
    let method = parse_method(&args.method)?;
    let url = if args.path.starts_with("http://") || args.path.starts_with("https://") {
        args.path
    } else {
        client.url(&args.path)
    };

    let mut request = BackendRequest::new(method, url);
    if let Some(body) = args.body {
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| Error::InvalidBody(e.to_string()))?;
        request = request.json(&value)?;
    }
    if let Some(secs) = args.timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }
    Ok(request)
}

fn parse_method(raw: &str) -> Result<Method> {
    match raw.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        _ => Err(Error::InvalidMethod(raw.to_string())),
    }
}

/// Log every event received so far. Returns how many were logged.
pub fn log_events(rx: &mut broadcast::Receiver<SessionEvent>) -> usize {
    let mut logged = 0;
    loop {
        match rx.try_recv() {
            Ok(SessionEvent::ForceSignOut { reason }) => {
                warn!(?reason, "session ended by client, sign in again");
                logged += 1;
            }
            Ok(SessionEvent::SessionRefreshed) => {
                info!("session token refreshed");
                logged += 1;
            }
            Ok(SessionEvent::ConnectionExpired { provider }) => {
                warn!(%provider, "calendar connection expired, reconnect required");
                logged += 1;
            }
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "session event subscriber lagged");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return logged,
        }
    }
}
