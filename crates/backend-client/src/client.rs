//! Authenticated backend client
//!
//! Every request goes out with the stored session token as a bearer
//! credential. Every response is reduced to one `ResponseOutcome`; a 401
//! that means "session token expired" triggers the shared refresh, and the
//! caller is told to retry. Session-level consequences are published on the
//! `EventBus` rather than returned.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use session_auth::{Credentials, TokenStore};
use tracing::{Span, debug, info, instrument, warn};
use uuid::Uuid;

use crate::classify::{Classification, classify};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent, SignOutReason};
use crate::metrics;
use crate::outcome::ResponseOutcome;
use crate::refresh::{RefreshFailure, RefreshResult, Refresher};
use crate::request::BackendRequest;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Whether a session-expired 401 may start a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshPolicy {
    Allow,
    /// Already retried with a fresh token; another 401 ends the session.
    Deny,
}

pub struct AuthenticatedClient {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<dyn TokenStore>,
    events: EventBus,
    refresher: Arc<Refresher>,
}

impl AuthenticatedClient {
    /// Build a client with its own HTTP client using `config.timeout`.
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>, events: EventBus) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::InvalidRequest(format!("building HTTP client: {e}")))?;
        Ok(Self::with_http_client(config, http, store, events))
    }

    pub fn with_http_client(
        config: ClientConfig,
        http: reqwest::Client,
        store: Arc<dyn TokenStore>,
        events: EventBus,
    ) -> Self {
        let refresher = Arc::new(Refresher::new(
            http.clone(),
            config.url(&config.refresh_path),
            Arc::clone(&store),
            events.clone(),
        ));
        Self {
            http,
            config,
            store,
            events,
            refresher,
        }
    }

    /// Absolute URL for a backend path.
    pub fn url(&self, path: &str) -> String {
        self.config.url(path)
    }

    /// Send one request and classify its response.
    ///
    /// Transport failures are `Err(Error::Network)`. Every HTTP response,
    /// whatever its status, is `Ok`. `RetryWithNewToken` means a refresh
    /// landed and the caller should re-issue the request; `execute` does
    /// that for you.
    pub async fn send(&self, request: &BackendRequest) -> Result<ResponseOutcome> {
        self.dispatch(request, RefreshPolicy::Allow).await
    }

    /// `send`, re-issued once after `RetryWithNewToken`.
    ///
    /// A 401 on the retry ends the session instead of refreshing again.
    pub async fn execute(&self, request: &BackendRequest) -> Result<ResponseOutcome> {
        match self.dispatch(request, RefreshPolicy::Allow).await? {
            ResponseOutcome::RetryWithNewToken => {
                debug!("session refreshed, retrying request once");
                self.dispatch(request, RefreshPolicy::Deny).await
            }
            outcome => Ok(outcome),
        }
    }

    /// Classify a response that was sent with `sent_token`.
    ///
    /// May refresh the session and publish events; see `ResponseOutcome`.
    /// A refresh that fails in transport is `Err(Error::Network)`.
    pub async fn validate(
        &self,
        url: &str,
        status: StatusCode,
        body: Bytes,
        sent_token: &str,
    ) -> Result<ResponseOutcome> {
        let path = reqwest::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        self.validate_with(&path, status, body, sent_token, RefreshPolicy::Allow)
            .await
    }

    /// Single-flight refresh unless `rejected_token` is already stale.
    pub async fn refresh_if_needed(&self, rejected_token: &str) -> RefreshResult {
        self.refresher.refresh_if_needed(rejected_token).await
    }

    /// Refresh the currently stored access token.
    pub async fn refresh(&self) -> RefreshResult {
        let current = self.store.access_token().await;
        let current = current.as_ref().map_or("", |t| t.expose().as_str());
        self.refresher.refresh_if_needed(current).await
    }

    pub async fn sign_in(&self, credentials: Credentials) -> Result<()> {
        self.store.save(credentials).await?;
        info!("signed in");
        Ok(())
    }

    /// Best-effort server logout, then drop local credentials.
    ///
    /// User-initiated, so no `ForceSignOut` is published.
    pub async fn sign_out(&self) -> Result<()> {
        match self.store.access_token().await.filter(|t| !t.is_empty()) {
            Some(token) => {
                let url = self.config.url(&self.config.logout_path);
                if let Err(e) = session_auth::logout(&self.http, &url, token.expose()).await {
                    warn!(error = %e, "server logout failed, clearing local session anyway");
                }
            }
            None => debug!("no access token stored, skipping server logout"),
        }
        self.store.clear().await?;
        info!("signed out");
        Ok(())
    }

    #[instrument(skip_all, fields(method = %request.method, path, request_id))]
    async fn dispatch(
        &self,
        request: &BackendRequest,
        policy: RefreshPolicy,
    ) -> Result<ResponseOutcome> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| Error::InvalidRequest(format!("invalid url {}: {e}", request.url)))?;
        let request_id = format!("req_{}", Uuid::new_v4().as_simple());
        let span = Span::current();
        span.record("path", url.path());
        span.record("request_id", request_id.as_str());

        let token = self.store.access_token().await;
        let sent_token = token.as_ref().map_or("", |t| t.expose().as_str());
        if sent_token.is_empty() {
            debug!("no access token stored, sending empty bearer");
        }

        let mut headers = request.headers.clone();
        let mut authorization = HeaderValue::from_str(&format!("Bearer {sent_token}"))
            .map_err(|_| Error::InvalidRequest("access token is not a valid header value".into()))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(
            REQUEST_ID_HEADER,
            HeaderValue::from_str(&request_id)
                .map_err(|e| Error::InvalidRequest(format!("request id header: {e}")))?,
        );

        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .headers(headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!("sending backend request");
        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, timed_out = e.is_timeout(), "backend request failed");
            Error::transport(e)
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(Error::transport)?;

        let outcome = self
            .validate_with(url.path(), status, body, sent_token, policy)
            .await?;
        debug!(
            status = status.as_u16(),
            outcome = outcome.label(),
            "backend request completed"
        );
        Ok(outcome)
    }

    async fn validate_with(
        &self,
        path: &str,
        status: StatusCode,
        body: Bytes,
        sent_token: &str,
        policy: RefreshPolicy,
    ) -> Result<ResponseOutcome> {
        let endpoint = self.config.endpoint_kind(path);
        let outcome = match classify(status, endpoint, &body) {
            Classification::Success => ResponseOutcome::Success {
                status: status.as_u16(),
                body,
            },
            Classification::RefreshRejected => {
                warn!("refresh endpoint rejected the session, forcing sign-out");
                self.force_sign_out(SignOutReason::RefreshRejected);
                ResponseOutcome::SessionExpired
            }
            Classification::ConnectionExpired(provider) => {
                info!(%provider, "calendar connection expired");
                self.events.publish(SessionEvent::ConnectionExpired {
                    provider: provider.clone(),
                });
                ResponseOutcome::ConnectionExpired { provider }
            }
            Classification::SessionExpired => self.session_expired(sent_token, policy).await?,
            Classification::TransientFailure { retryable, message } => {
                ResponseOutcome::TransientFailure { retryable, message }
            }
            Classification::HttpError { message } => ResponseOutcome::HttpError {
                status: status.as_u16(),
                message,
                details: String::from_utf8_lossy(&body).into_owned(),
            },
        };
        metrics::record_outcome(&outcome);
        Ok(outcome)
    }

    async fn session_expired(
        &self,
        sent_token: &str,
        policy: RefreshPolicy,
    ) -> Result<ResponseOutcome> {
        if policy == RefreshPolicy::Deny {
            warn!("request rejected again after refresh, forcing sign-out");
            self.force_sign_out(SignOutReason::RejectedAfterRefresh);
            return Ok(ResponseOutcome::SessionExpired);
        }

        match self.refresher.refresh_if_needed(sent_token).await {
            RefreshResult::Refreshed => Ok(ResponseOutcome::RetryWithNewToken),
            // Session is kept; the caller sees the same error as a failed send
            RefreshResult::Failed(RefreshFailure::Network { message, timed_out }) => {
                Err(Error::Network { message, timed_out })
            }
            RefreshResult::Failed(_) => Ok(ResponseOutcome::SessionExpired),
        }
    }

    fn force_sign_out(&self, reason: SignOutReason) {
        self.events.publish(SessionEvent::ForceSignOut { reason });
    }
}
