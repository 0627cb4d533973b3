//! Client configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/worldbest/client.toml`
//! - Windows: `%APPDATA%/worldbest/client.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use worldbest_protocol::constants::{DEFAULT_API_URL, DEFAULT_WS_URL, HTTP_REQUEST_TIMEOUT};
use worldbest_realtime::ReconnectConfig;

const CONFIG_FILE: &str = "client.toml";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Realtime WebSocket endpoint.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Where credentials are persisted. Empty means the default location.
    #[serde(default)]
    pub credentials_path: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

/// Backoff settings for the realtime connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.into()
}

fn default_timeout_secs() -> u64 {
    HTTP_REQUEST_TIMEOUT.as_secs()
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(s: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            max_attempts: s.max_attempts,
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            credentials_path: String::new(),
            request_timeout_secs: default_timeout_secs(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `path`, or creates a default if not found.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = ClientConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Credentials file, falling back to the platform default.
    pub fn credentials_path(&self) -> Option<PathBuf> {
        if self.credentials_path.is_empty() {
            worldbest_session::file_store::default_credentials_path()
        } else {
            Some(PathBuf::from(&self.credentials_path))
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    worldbest_session::file_store::config_dir()
        .map(|d| d.join("worldbest").join(CONFIG_FILE))
        .ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_url, "http://localhost/api/v1");
        assert_eq!(config.ws_url, "ws://localhost/ws");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            api_url = "https://api.worldbest.example/v1"

            [reconnect]
            max_attempts = 8
        "#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_url, "https://api.worldbest.example/v1");
        assert_eq!(config.ws_url, "ws://localhost/ws");
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
    }

    #[test]
    fn reconnect_settings_convert() {
        let settings = ReconnectSettings {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            max_attempts: 3,
        };
        let config = ReconnectConfig::from(&settings);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
        assert!((config.backoff_factor - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join(CONFIG_FILE);

        let config = ClientConfig::load(&path).unwrap();

        assert_eq!(config, ClientConfig::default());
        assert!(path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn save_then_load_keeps_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        let config = ClientConfig {
            credentials_path: "/tmp/wb/creds.json".into(),
            request_timeout_secs: 5,
            ..Default::default()
        };

        config.save(&path).unwrap();
        let loaded = ClientConfig::load(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(
            loaded.credentials_path(),
            Some(PathBuf::from("/tmp/wb/creds.json"))
        );
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "api_url = [").unwrap();
        assert!(ClientConfig::load(&path).is_err());
    }
}
