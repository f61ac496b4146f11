//! Token store abstraction
//!
//! The client never touches credential storage directly; it goes through
//! `TokenStore`, which must be safe to call from concurrent tasks. Uses
//! `Pin<Box<dyn Future>>` return types so the store can be shared as
//! `Arc<dyn TokenStore>`.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use tokio::sync::RwLock;
use tracing::debug;

use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Boxed future returned by `TokenStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable storage for the session's access and refresh tokens.
pub trait TokenStore: Send + Sync {
    /// Current access token, or None when signed out.
    fn access_token(&self) -> StoreFuture<'_, Option<Secret<String>>>;

    /// Current refresh token, or None when signed out.
    fn refresh_token(&self) -> StoreFuture<'_, Option<Secret<String>>>;

    /// Replace the access token after a successful refresh.
    ///
    /// Fails with `NotFound` when there is no session to update.
    fn store_access_token(&self, access_token: String) -> StoreFuture<'_, Result<()>>;

    /// Store a full credential set (sign-in).
    fn save(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>>;

    /// Destroy the stored session (sign-out).
    fn clear(&self) -> StoreFuture<'_, Result<()>>;
}

/// In-process token store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: RwLock<Option<Credentials>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start already signed in.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            state: RwLock::new(Some(credentials)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> StoreFuture<'_, Option<Secret<String>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            state.as_ref().map(|c| Secret::new(c.access_token.clone()))
        })
    }

    fn refresh_token(&self) -> StoreFuture<'_, Option<Secret<String>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            state.as_ref().map(|c| Secret::new(c.refresh_token.clone()))
        })
    }

    fn store_access_token(&self, access_token: String) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let credentials = state
                .as_mut()
                .ok_or_else(|| Error::NotFound("no session to update".into()))?;
            credentials.access_token = access_token;
            debug!("stored refreshed access token in memory");
            Ok(())
        })
    }

    fn save(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = Some(credentials);
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.write().await.take();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_store_has_no_tokens() {
        let store = MemoryTokenStore::new();
        assert!(store.access_token().await.is_none());
        assert!(store.refresh_token().await.is_none());
    }

    #[tokio::test]
    async fn store_then_read_access_token() {
        let store = MemoryTokenStore::with_credentials(Credentials::new("at_old", "rt_1"));
        store.store_access_token("at_new".into()).await.unwrap();

        let access = store.access_token().await.unwrap();
        assert_eq!(access.expose(), "at_new");
        // Refresh token is untouched
        assert_eq!(store.refresh_token().await.unwrap().expose(), "rt_1");
    }

    #[tokio::test]
    async fn store_access_token_without_session_errors() {
        let store = MemoryTokenStore::new();
        let result = store.store_access_token("at_new".into()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn clear_signs_out() {
        let store = MemoryTokenStore::new();
        store.save(Credentials::new("at_1", "rt_1")).await.unwrap();
        assert!(store.access_token().await.is_some());

        store.clear().await.unwrap();
        assert!(store.access_token().await.is_none());
        assert!(store.refresh_token().await.is_none());
    }
}
