//! Client configuration
//!
//! Plain typed settings; loading them from a file is the application's job.

use std::time::Duration;

use session_auth::{HEALTH_PATH, LOGOUT_PATH, REFRESH_PATH};

/// Which auth rules apply to a request, decided from its URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// The refresh endpoint itself. A 401 here means the refresh token is dead.
    Refresh,
    /// Unauthenticated health check. A 401 here never triggers a refresh.
    HealthCheck,
    Other,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `https://api.example.com/v1`
    pub base_url: String,
    /// Per-request timeout, also bounding the refresh call
    pub timeout: Duration,
    pub refresh_path: String,
    pub logout_path: String,
    /// Paths exempt from refresh on 401
    pub health_paths: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            refresh_path: REFRESH_PATH.to_string(),
            logout_path: LOGOUT_PATH.to_string(),
            health_paths: vec![HEALTH_PATH.to_string()],
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Join a path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Classify a request path. The base URL's own path (`/v1`) is removed
    /// first, then the remainder must equal a configured route.
    pub fn endpoint_kind(&self, path: &str) -> EndpointKind {
        let path = self.strip_base_path(path);
        if path_matches(path, &self.refresh_path) {
            EndpointKind::Refresh
        } else if self.health_paths.iter().any(|p| path_matches(path, p)) {
            EndpointKind::HealthCheck
        } else {
            EndpointKind::Other
        }
    }

    fn strip_base_path<'a>(&self, path: &'a str) -> &'a str {
        let Ok(base) = reqwest::Url::parse(&self.base_url) else {
            return path;
        };
        let prefix = base.path().trim_end_matches('/');
        match path.strip_prefix(prefix) {
            Some(rest) if !prefix.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
            _ => path,
        }
    }
}

fn path_matches(path: &str, route: &str) -> bool {
    let route = route.trim_matches('/');
    !route.is_empty() && path.trim_matches('/') == route
}
