//! Configuration file support

use serde::{Deserialize, Serialize};
use shipwright_api::{Endpoints, ReleaseType};
use shipwright_chat::ReconcilerConfig;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for shipwright
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend location
    pub server: ServerConfig,
    /// Polling behaviour
    pub polling: PollingConfig,
    /// Default release form
    pub release: ReleaseDefaults,
}

/// Backend endpoints (paths are relative to `base_url`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: Option<String>,
    pub send_path: Option<String>,
    pub status_path: Option<String>,
    pub repositories_path: Option<String>,
    pub approvals_path: Option<String>,
}

/// Poll timings in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub poll_interval_ms: Option<u64>,
    pub error_backoff_ms: Option<u64>,
    pub flush_interval_ms: Option<u64>,
    pub max_consecutive_errors: Option<u32>,
}

/// Release form values used when none are given on the command line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseDefaults {
    pub repositories: Vec<String>,
    pub release_type: Option<ReleaseType>,
    pub sprint_name: Option<String>,
    pub fix_version: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shipwright")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SHIPWRIGHT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let defaults = Endpoints::default();
        let default_config = Config {
            server: ServerConfig {
                base_url: Some(defaults.base_url),
                ..Default::default()
            },
            polling: PollingConfig::default(),
            release: ReleaseDefaults::default(),
        };

        default_config.save()?;
        Ok(path)
    }

    /// Endpoints with CLI override > env var > config > built-in default
    pub fn endpoints(&self, base_url_override: Option<String>) -> Endpoints {
        let defaults = Endpoints::default();
        let base_url = base_url_override
            .or_else(|| std::env::var(shipwright_api::client::BASE_URL_ENV).ok())
            .or_else(|| self.server.base_url.clone())
            .unwrap_or(defaults.base_url);

        Endpoints {
            base_url,
            send_path: self.server.send_path.clone().unwrap_or(defaults.send_path),
            status_path: self.server.status_path.clone().unwrap_or(defaults.status_path),
            repositories_path: self
                .server
                .repositories_path
                .clone()
                .unwrap_or(defaults.repositories_path),
            approvals_path: self
                .server
                .approvals_path
                .clone()
                .unwrap_or(defaults.approvals_path),
        }
    }

    /// Reconciler settings for a new session
    pub fn reconciler(&self) -> ReconcilerConfig {
        let defaults = ReconcilerConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        ReconcilerConfig {
            poll_interval: ms(self.polling.poll_interval_ms, defaults.poll_interval),
            error_backoff: ms(self.polling.error_backoff_ms, defaults.error_backoff),
            flush_interval: ms(self.polling.flush_interval_ms, defaults.flush_interval),
            max_consecutive_errors: self
                .polling
                .max_consecutive_errors
                .unwrap_or(defaults.max_consecutive_errors),
            ..defaults
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# shipwright configuration file
# Place at ~/.config/shipwright/config.toml (Linux/Mac) or %APPDATA%\shipwright\config.toml (Windows)

[server]
# Release bot backend (SHIPWRIGHT_BASE_URL overrides this)
base_url = "http://localhost:8000"
# send_path = "/api/chat/send"
# status_path = "/api/workflow/status"
# repositories_path = "/api/repositories"
# approvals_path = "/api/approvals"

[polling]
# poll_interval_ms = 2000
# error_backoff_ms = 3000
# flush_interval_ms = 500
# max_consecutive_errors = 5

[release]
# Default release form; names are resolved against the repository directory
# repositories = ["billing-service", "web"]
# release_type = "release"    # or "hotfix"
# sprint_name = "Sprint 42"
# fix_version = "2.4.0"
"#
}
