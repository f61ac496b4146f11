//! Single-flight session token refresh
//!
//! At most one `POST /auth/refresh` is ever in flight. The first caller that
//! needs a refresh spawns it and parks a shared future in `in_flight`; every
//! concurrent caller clones that future and awaits the same result. The
//! refresh runs as its own task, so it completes even if the request that
//! started it is cancelled. The task clears the slot once it has finished.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use session_auth::TokenStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::events::{EventBus, SessionEvent, SignOutReason};
use crate::metrics;

/// Why a refresh did not produce a new access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshFailure {
    #[error("no refresh token stored")]
    NoRefreshToken,
    /// Refresh endpoint answered 401/403.
    #[error("refresh token rejected ({status})")]
    Rejected { status: u16 },
    /// Non-success status or undecodable body from the refresh endpoint.
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),
    /// Transport failure. The session is kept.
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },
    /// New token could not be persisted.
    #[error("could not store refreshed token: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshResult {
    /// A new access token is in the store.
    Refreshed,
    Failed(RefreshFailure),
}

impl RefreshResult {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, Self::Refreshed)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Refreshed => "refreshed",
            Self::Failed(RefreshFailure::NoRefreshToken) => "no_refresh_token",
            Self::Failed(RefreshFailure::Rejected { .. }) => "rejected",
            Self::Failed(RefreshFailure::InvalidResponse(_)) => "invalid_response",
            Self::Failed(RefreshFailure::Network { .. }) => "network",
            Self::Failed(RefreshFailure::Store(_)) => "store",
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

pub(crate) struct Refresher {
    http: reqwest::Client,
    refresh_url: String,
    store: Arc<dyn TokenStore>,
    events: EventBus,
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl Refresher {
    pub(crate) fn new(
        http: reqwest::Client,
        refresh_url: String,
        store: Arc<dyn TokenStore>,
        events: EventBus,
    ) -> Self {
        Self {
            http,
            refresh_url,
            store,
            events,
            in_flight: Mutex::new(None),
        }
    }

    /// Refresh unless `rejected_token` is already stale.
    ///
    /// `rejected_token` is the access token the backend just refused. If the
    /// store holds a different one, another caller's refresh (or a new
    /// sign-in) already replaced it and the caller can simply retry.
    pub(crate) async fn refresh_if_needed(self: &Arc<Self>, rejected_token: &str) -> RefreshResult {
        if let Some(current) = self.store.access_token().await
            && !current.is_empty()
            && current.expose() != rejected_token
        {
            debug!("access token already replaced, skipping refresh");
            return RefreshResult::Refreshed;
        }

        let refresh = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("joining in-flight token refresh");
                    metrics::record_refresh_joined();
                    in_flight.clone()
                }
                None => {
                    // A refresh may have finished between the check above and
                    // taking the slot
                    if let Some(current) = self.store.access_token().await
                        && !current.is_empty()
                        && current.expose() != rejected_token
                    {
                        debug!("access token replaced while waiting, skipping refresh");
                        return RefreshResult::Refreshed;
                    }
                    let refresh = self.spawn_refresh();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Spawn the refresh task. Caller must hold the `in_flight` lock.
    fn spawn_refresh(self: &Arc<Self>) -> SharedRefresh {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = this.perform_refresh().await;
            metrics::record_refresh(result.label());
            this.in_flight.lock().await.take();
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                RefreshResult::Failed(RefreshFailure::InvalidResponse(format!(
                    "refresh task failed: {e}"
                )))
            })
        }
        .boxed()
        .shared()
    }

    /// The one refresh call. Publishes exactly one event for its outcome.
    ///
    /// Talks to the refresh endpoint directly, never through response
    /// classification, so a 401 here cannot recurse into another refresh.
    async fn perform_refresh(&self) -> RefreshResult {
        let Some(refresh_token) = self.store.refresh_token().await.filter(|t| !t.is_empty())
        else {
            warn!("session refresh needed but no refresh token stored, forcing sign-out");
            self.force_sign_out(SignOutReason::NoRefreshToken);
            return RefreshResult::Failed(RefreshFailure::NoRefreshToken);
        };

        debug!("refreshing session token");
        match session_auth::refresh_access_token(
            &self.http,
            &self.refresh_url,
            refresh_token.expose(),
        )
        .await
        {
            Ok(refreshed) => match self.store.store_access_token(refreshed.access_token).await {
                Ok(()) => {
                    info!("session token refreshed");
                    self.events.publish(SessionEvent::SessionRefreshed);
                    RefreshResult::Refreshed
                }
                Err(e) => {
                    warn!(error = %e, "failed to persist refreshed token, forcing sign-out");
                    self.force_sign_out(SignOutReason::RefreshFailed);
                    RefreshResult::Failed(RefreshFailure::Store(e.to_string()))
                }
            },
            Err(session_auth::Error::InvalidCredentials { status, .. }) => {
                warn!(status, "refresh token rejected, forcing sign-out");
                self.force_sign_out(SignOutReason::RefreshRejected);
                RefreshResult::Failed(RefreshFailure::Rejected { status })
            }
            Err(session_auth::Error::Http { message, timed_out }) => {
                warn!(error = %message, timed_out, "token refresh failed in transport, keeping session");
                RefreshResult::Failed(RefreshFailure::Network { message, timed_out })
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, forcing sign-out");
                self.force_sign_out(SignOutReason::RefreshFailed);
                RefreshResult::Failed(RefreshFailure::InvalidResponse(e.to_string()))
            }
        }
    }

    fn force_sign_out(&self, reason: SignOutReason) {
        self.events.publish(SessionEvent::ForceSignOut { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use session_auth::{Credentials, MemoryTokenStore, StoreFuture};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn refresher(server: &MockServer, store: Arc<dyn TokenStore>) -> (Arc<Refresher>, EventBus) {
        let events = EventBus::default();
        let refresher = Refresher::new(
            reqwest::Client::new(),
            format!("{}/auth/refresh", server.uri()),
            store,
            events.clone(),
        );
        (Arc::new(refresher), events)
    }

    /// Holds the next access token read for a while after reading it, so a
    /// caller can act on a token that is replaced in the meantime.
    struct DelayedReadStore {
        inner: MemoryTokenStore,
        delay_next_read: AtomicBool,
    }

    impl TokenStore for DelayedReadStore {
        fn access_token(&self) -> StoreFuture<'_, Option<Secret<String>>> {
            Box::pin(async move {
                let token = self.inner.access_token().await;
                if self.delay_next_read.swap(false, Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(400)).await;
                }
                token
            })
        }

        fn refresh_token(&self) -> StoreFuture<'_, Option<Secret<String>>> {
            self.inner.refresh_token()
        }

        fn store_access_token(
            &self,
            access_token: String,
        ) -> StoreFuture<'_, session_auth::Result<()>> {
            self.inner.store_access_token(access_token)
        }

        fn save(&self, credentials: Credentials) -> StoreFuture<'_, session_auth::Result<()>> {
            self.inner.save(credentials)
        }

        fn clear(&self) -> StoreFuture<'_, session_auth::Result<()>> {
            self.inner.clear()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn mount_refresh(server: &MockServer, response: ResponseTemplate, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(response)
            .expect(expected)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn successful_refresh_stores_token_and_publishes() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"accessToken": "at_new"})),
            1,
        )
        .await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_old", "rt_1",
        )));
        let (refresher, events) = refresher(&server, store.clone());
        let mut rx = events.subscribe();

        let result = refresher.refresh_if_needed("at_old").await;

        assert_eq!(result, RefreshResult::Refreshed);
        assert_eq!(store.access_token().await.unwrap().expose(), "at_new");
        assert_eq!(drain(&mut rx), vec![SessionEvent::SessionRefreshed]);
    }

    #[tokio::test]
    async fn stale_rejected_token_skips_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, ResponseTemplate::new(200), 0).await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_new", "rt_1",
        )));
        let (refresher, _events) = refresher(&server, store);

        assert_eq!(
            refresher.refresh_if_needed("at_old").await,
            RefreshResult::Refreshed
        );
    }

    #[tokio::test]
    async fn missing_refresh_token_signs_out_without_calling_endpoint() {
        let server = MockServer::start().await;
        mount_refresh(&server, ResponseTemplate::new(200), 0).await;
        let store = Arc::new(MemoryTokenStore::new());
        let (refresher, events) = refresher(&server, store);
        let mut rx = events.subscribe();

        let result = refresher.refresh_if_needed("").await;

        assert_eq!(
            result,
            RefreshResult::Failed(RefreshFailure::NoRefreshToken)
        );
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::ForceSignOut {
                reason: SignOutReason::NoRefreshToken
            }]
        );
    }

    #[tokio::test]
    async fn rejected_refresh_signs_out() {
        let server = MockServer::start().await;
        mount_refresh(&server, ResponseTemplate::new(401), 1).await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_old", "rt_revoked",
        )));
        let (refresher, events) = refresher(&server, store.clone());
        let mut rx = events.subscribe();

        let result = refresher.refresh_if_needed("at_old").await;

        assert_eq!(
            result,
            RefreshResult::Failed(RefreshFailure::Rejected { status: 401 })
        );
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::ForceSignOut {
                reason: SignOutReason::RefreshRejected
            }]
        );
        // Token untouched
        assert_eq!(store.access_token().await.unwrap().expose(), "at_old");
    }

    #[tokio::test]
    async fn server_error_on_refresh_signs_out() {
        let server = MockServer::start().await;
        mount_refresh(&server, ResponseTemplate::new(502), 1).await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_old", "rt_1",
        )));
        let (refresher, events) = refresher(&server, store);
        let mut rx = events.subscribe();

        let result = refresher.refresh_if_needed("at_old").await;

        assert!(matches!(
            result,
            RefreshResult::Failed(RefreshFailure::InvalidResponse(_))
        ));
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::ForceSignOut {
                reason: SignOutReason::RefreshFailed
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"accessToken": "at_new"}))
                .set_delay(Duration::from_millis(200)),
            1,
        )
        .await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_old", "rt_1",
        )));
        let (refresher, events) = refresher(&server, store);
        let mut rx = events.subscribe();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let refresher = refresher.clone();
            handles.push(tokio::spawn(async move {
                refresher.refresh_if_needed("at_old").await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), RefreshResult::Refreshed);
        }

        assert_eq!(drain(&mut rx), vec![SessionEvent::SessionRefreshed]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_waiters_see_one_sign_out() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            ResponseTemplate::new(401).set_delay(Duration::from_millis(200)),
            1,
        )
        .await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_old", "rt_revoked",
        )));
        let (refresher, events) = refresher(&server, store);
        let mut rx = events.subscribe();

        let (a, b, c) = tokio::join!(
            refresher.refresh_if_needed("at_old"),
            refresher.refresh_if_needed("at_old"),
            refresher.refresh_if_needed("at_old"),
        );
        let expected = RefreshResult::Failed(RefreshFailure::Rejected { status: 401 });
        assert_eq!(a, expected);
        assert_eq!(b, expected);
        assert_eq!(c, expected);

        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::ForceSignOut {
                reason: SignOutReason::RefreshRejected
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_caller_with_stale_read_does_not_refresh_again() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"accessToken": "at_new"}))
                .set_delay(Duration::from_millis(100)),
            1,
        )
        .await;
        let store = Arc::new(DelayedReadStore {
            inner: MemoryTokenStore::with_credentials(Credentials::new("at_old", "rt_1")),
            delay_next_read: AtomicBool::new(false),
        });
        let (refresher, events) = refresher(&server, store.clone());
        let mut rx = events.subscribe();

        let first = {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.refresh_if_needed("at_old").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The second caller reads at_old, then stalls until the first refresh
        // has stored at_new and cleared the slot
        store.delay_next_read.store(true, Ordering::SeqCst);
        let second = {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.refresh_if_needed("at_old").await })
        };

        assert_eq!(first.await.unwrap(), RefreshResult::Refreshed);
        assert_eq!(second.await.unwrap(), RefreshResult::Refreshed);
        assert_eq!(store.access_token().await.unwrap().expose(), "at_new");
        assert_eq!(drain(&mut rx), vec![SessionEvent::SessionRefreshed]);
    }

    #[tokio::test]
    async fn transport_failure_keeps_session() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let refresher = Arc::new(Refresher::new(
            reqwest::Client::new(),
            format!("http://{addr}/auth/refresh"),
            Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
                "at_old", "rt_1",
            ))),
            events.clone(),
        ));

        let result = refresher.refresh_if_needed("at_old").await;

        assert!(matches!(
            result,
            RefreshResult::Failed(RefreshFailure::Network {
                timed_out: false,
                ..
            })
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn failure_display_is_readable() {
        assert_eq!(
            RefreshFailure::NoRefreshToken.to_string(),
            "no refresh token stored"
        );
        assert_eq!(
            RefreshFailure::Rejected { status: 403 }.to_string(),
            "refresh token rejected (403)"
        );
    }

    #[tokio::test]
    async fn slot_is_cleared_after_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, ResponseTemplate::new(503), 2).await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_old", "rt_1",
        )));
        let (refresher, _events) = refresher(&server, store);

        // Two sequential refreshes each reach the endpoint
        assert!(!refresher.refresh_if_needed("at_old").await.is_refreshed());
        assert!(!refresher.refresh_if_needed("at_old").await.is_refreshed());
        assert!(refresher.in_flight.lock().await.is_none());
    }

    #[tokio::test]
    async fn refresh_survives_cancelled_caller() {
        let server = MockServer::start().await;
        mount_refresh(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"accessToken": "at_new"}))
                .set_delay(Duration::from_millis(200)),
            1,
        )
        .await;
        let store = Arc::new(MemoryTokenStore::with_credentials(Credentials::new(
            "at_old", "rt_1",
        )));
        let (refresher, _events) = refresher(&server, store.clone());

        let caller = {
            let refresher = refresher.clone();
            tokio::spawn(async move { refresher.refresh_if_needed("at_old").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();

        // A later caller joins or observes the same refresh, no second call
        assert_eq!(
            refresher.refresh_if_needed("at_old").await,
            RefreshResult::Refreshed
        );
        assert_eq!(store.access_token().await.unwrap().expose(), "at_new");
    }
}
