//! Session credentials and their on-disk store
//!
//! `FileTokenStore` keeps one credential set in a JSON file. All writes use
//! atomic temp-file + rename to prevent corruption on crash. A tokio Mutex
//! serializes concurrent writes from request-time refresh, sign-in and
//! sign-out. A missing file means the user is signed out.

use std::fmt;
use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::DEFAULT_TOKEN_TYPE;
use crate::error::{Error, Result};
use crate::store::{StoreFuture, TokenStore};

/// The app's own session credentials.
///
/// Created at sign-in. `access_token` is replaced on every successful
/// refresh; the whole set is destroyed at sign-out.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Bearer token sent on every request
    pub access_token: String,
    /// Exchanged at `/auth/refresh` for a new access token
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// File-backed token store.
///
/// The Mutex serializes all writes. Reads acquire the lock briefly to clone
/// the in-memory state, so request-time reads don't block on disk I/O of
/// other tasks for longer than one write.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<Option<Credentials>>,
}

impl FileTokenStore {
    /// Load credentials from the given file path.
    ///
    /// A missing file is a signed-out store; nothing is created until the
    /// first `save()`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credentials: Credentials = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), "loaded session credentials");
            Some(credentials)
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> StoreFuture<'_, Option<Secret<String>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.as_ref().map(|c| Secret::new(c.access_token.clone()))
        })
    }

    fn refresh_token(&self) -> StoreFuture<'_, Option<Secret<String>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state.as_ref().map(|c| Secret::new(c.refresh_token.clone()))
        })
    }

    fn store_access_token(&self, access_token: String) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let mut updated = state.as_ref().cloned().ok_or_else(|| {
                Error::NotFound(format!("no session stored at {}", self.path.display()))
            })?;
            updated.access_token = access_token;
            // Memory only follows a successful write
            write_atomic(&self.path, &updated).await?;
            *state = Some(updated);
            debug!("updated access token");
            Ok(())
        })
    }

    fn save(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &credentials).await?;
            *state = Some(credentials);
            debug!("saved session credentials");
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.take();
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed credential file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
            }
        })
    }
}

/// Write credentials to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains session tokens.
async fn write_atomic(path: &Path, credentials: &Credentials) -> Result<()> {
    let json = serde_json::to_string_pretty(credentials)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
