//! Configuration file handling

use serde::Deserialize;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Remote service endpoints
    #[serde(default)]
    pub api: ApiConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Status monitor tuning
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Remote service endpoints
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Production API base URL
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Production web app base URL, used for report links
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Development API base URL (selected with `--dev`)
    #[serde(default = "default_dev_backend_url")]
    pub dev_backend_url: String,

    /// Development web app base URL
    #[serde(default = "default_dev_app_url")]
    pub dev_app_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            app_url: default_app_url(),
            dev_backend_url: default_dev_backend_url(),
            dev_app_url: default_dev_app_url(),
        }
    }
}

fn default_backend_url() -> String {
    "https://backend.devicelab.dev".to_string()
}
fn default_app_url() -> String {
    "https://app.devicelab.dev".to_string()
}
fn default_dev_backend_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_dev_app_url() -> String {
    "http://localhost:3000".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Default run timeout when neither the flag nor the project sets one
    #[serde(default = "default_run")]
    pub run_default_secs: u64,

    /// Timeout for the best-effort remote cancel call
    #[serde(default = "default_cancel_request")]
    pub cancel_request_secs: u64,

    /// Timeout for ordinary API requests
    #[serde(default = "default_http_request")]
    pub http_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            run_default_secs: default_run(),
            cancel_request_secs: default_cancel_request(),
            http_request_secs: default_http_request(),
        }
    }
}

fn default_run() -> u64 {
    3600
}
fn default_cancel_request() -> u64 {
    10
}
fn default_http_request() -> u64 {
    30
}

/// Status monitor tuning
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Interval between status polls when streaming is unavailable
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Consecutive poll failures tolerated before giving up
    #[serde(default = "default_max_errors")]
    pub max_consecutive_errors: u32,

    /// How many times a dropped status stream is re-established
    #[serde(default = "default_stream_reconnects")]
    pub stream_reconnects: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_consecutive_errors: default_max_errors(),
            stream_reconnects: default_stream_reconnects(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2000
}
fn default_max_errors() -> u32 {
    10
}
fn default_stream_reconnects() -> u32 {
    1
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Resolved API and app base URLs for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub backend_url: String,
    pub app_url: String,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist.
    /// `DEVICELAB_BACKEND_URL` and `DEVICELAB_APP_URL` override the
    /// production endpoints.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| super::Error::file_read(&path, e))?;
                Self::from_toml(&content)?
            }
            _ => Self::default(),
        };

        if let Ok(url) = std::env::var("DEVICELAB_BACKEND_URL") {
            config.api.backend_url = url;
        }
        if let Ok(url) = std::env::var("DEVICELAB_APP_URL") {
            config.api.app_url = url;
        }
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Select development or production endpoints
    pub fn endpoints(&self, dev: bool) -> Endpoints {
        let (backend, app) = if dev {
            (&self.api.dev_backend_url, &self.api.dev_app_url)
        } else {
            (&self.api.backend_url, &self.api.app_url)
        };
        Endpoints {
            backend_url: backend.trim_end_matches('/').to_string(),
            app_url: app.trim_end_matches('/').to_string(),
        }
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.cancel_request_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.http_request_secs)
    }
}
