//! Session token refresh and logout calls
//!
//! Both talk to the backend's auth routes directly. They are deliberately
//! independent of the authenticated client: a 401 from `/auth/refresh` is
//! reported here as `InvalidCredentials` and must never be fed back into
//! response classification, or a rejected refresh token would trigger
//! another refresh.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Body of a successful `POST /auth/refresh`.
///
/// Only `accessToken` is required. Extra fields are ignored.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Seconds until the new access token expires, when the backend says
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

impl fmt::Debug for RefreshResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchange a refresh token for a new access token.
///
/// `url` is the absolute refresh endpoint. 401/403 mean the refresh token
/// itself is invalid and the session is over.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    url: &str,
    refresh_token: &str,
) -> Result<RefreshResponse> {
    let response = client
        .post(url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(|e| Error::transport("token refresh", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials {
                status: status.as_u16(),
                body,
            });
        }

        return Err(Error::TokenExchange(format!(
            "refresh endpoint returned {status}: {body}"
        )));
    }

    let refreshed = response
        .json::<RefreshResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;

    if refreshed.access_token.is_empty() {
        return Err(Error::TokenExchange(
            "refresh response carried an empty access token".into(),
        ));
    }

    debug!(expires_in = ?refreshed.expires_in, "refresh endpoint issued new access token");
    Ok(refreshed)
}

/// Invalidate the session server-side.
///
/// Sends the current access token as a bearer credential. Callers treat
/// failure as non-fatal: local credentials are cleared either way.
pub async fn logout(client: &reqwest::Client, url: &str, access_token: &str) -> Result<()> {
    let response = client
        .post(url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| Error::transport("logout", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Logout(format!(
            "logout endpoint returned {status}: {body}"
        )));
    }
    Ok(())
}
