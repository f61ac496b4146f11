//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `BACKEND_URL` overrides `backend.base_url`. Session tokens never live in
//! the TOML; they are in the credential file named by `tokens.credentials_path`.

use backend_client::{ClientConfig, DEFAULT_EVENT_CAPACITY};
use serde::Deserialize;
use session_auth::{HEALTH_PATH, LOGOUT_PATH, REFRESH_PATH};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub tokens: TokensConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Calendar backend settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    /// Routes where a 401 is reported as-is instead of refreshing
    #[serde(default = "default_health_paths")]
    pub health_paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokensConfig {
    pub credentials_path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_refresh_path() -> String {
    REFRESH_PATH.to_string()
}

fn default_logout_path() -> String {
    LOGOUT_PATH.to_string()
}

fn default_health_paths() -> Vec<String> {
    vec![HEALTH_PATH.to_string()]
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("BACKEND_URL") {
            config.backend.base_url = url;
        }

        if !config.backend.base_url.starts_with("http://")
            && !config.backend.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.backend.base_url
            )));
        }

        if config.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.events.capacity == 0 {
            return Err(common::Error::Config(
                "events.capacity must be greater than 0".into(),
            ));
        }

        if config.backend.refresh_path.trim().is_empty() {
            return Err(common::Error::Config(
                "refresh_path must not be empty".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-probe.toml")
    }

    /// Typed settings for the authenticated client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.backend.base_url.clone(),
            timeout: Duration::from_secs(self.backend.timeout_secs),
            refresh_path: self.backend.refresh_path.clone(),
            logout_path: self.backend.logout_path.clone(),
            health_paths: self.backend.health_paths.clone(),
        }
    }
}
