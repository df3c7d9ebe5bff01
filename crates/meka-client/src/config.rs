//! Client configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/meka/config.toml)
//! 3. Environment variables (MEKA_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clock::{ClockSettings, DEFAULT_TICK_TIME};

/// Environment variable prefix
const ENV_PREFIX: &str = "MEKA";

const DEFAULT_API_URL: &str = "http://localhost:3000";
const DEFAULT_WEBSOCKET_URL: &str = "ws://localhost:3000";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// GraphQL API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// WebSocket base URL; the session id is appended as a path segment
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,

    /// Preset JWT; skips the key/secret exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,

    /// How long `connect` waits for the first session state
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub clock: ClockConfig,

    /// Log level for the CLI's subscriber
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Initial clock settings, replaced by the server's on the first import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_tick_time_ms")]
    pub tick_time_ms: u64,

    #[serde(default)]
    pub tick_count: u64,

    #[serde(default)]
    pub auto_start: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_time_ms: default_tick_time_ms(),
            tick_count: 0,
            auto_start: false,
        }
    }
}

impl ClockConfig {
    pub fn settings(&self) -> ClockSettings {
        ClockSettings {
            tick_time: Duration::from_millis(self.tick_time_ms),
            tick_count: self.tick_count,
            auto_start: self.auto_start,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            websocket_url: default_websocket_url(),
            api_key: None,
            api_secret: None,
            jwt: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            clock: ClockConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (MEKA_API_URL, MEKA_WEBSOCKET_URL, MEKA_API_KEY, ...)
    /// 2. Config file (~/.config/meka/config.toml or MEKA_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: ClientConfig =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_var("API_URL") {
            self.api_url = val;
        }
        if let Some(val) = env_var("WEBSOCKET_URL") {
            self.websocket_url = val;
        }

        // Empty string clears these
        if let Some(val) = env_var("API_KEY") {
            self.api_key = non_empty(val);
        }
        if let Some(val) = env_var("API_SECRET") {
            self.api_secret = non_empty(val);
        }
        if let Some(val) = env_var("JWT") {
            self.jwt = non_empty(val);
        }

        if let Some(val) = env_var("CONNECT_TIMEOUT_SECS") {
            match val.parse() {
                Ok(secs) => self.connect_timeout_secs = secs,
                Err(_) => tracing::warn!(
                    "Ignoring {}_CONNECT_TIMEOUT_SECS={:?}: not a number",
                    ENV_PREFIX,
                    val
                ),
            }
        }
        if let Some(val) = env_var("LOG_LEVEL") {
            self.log_level = val;
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with MEKA_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meka")
            .join("config.toml")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Whether credentials for the key/secret exchange are configured
    pub fn has_api_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, suffix)).ok()
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_websocket_url() -> String {
    DEFAULT_WEBSOCKET_URL.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_tick_time_ms() -> u64 {
    DEFAULT_TICK_TIME.as_millis() as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "MEKA_CONFIG",
        "MEKA_API_URL",
        "MEKA_WEBSOCKET_URL",
        "MEKA_API_KEY",
        "MEKA_API_SECRET",
        "MEKA_JWT",
        "MEKA_CONNECT_TIMEOUT_SECS",
        "MEKA_LOG_LEVEL",
    ];

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_url, "http://localhost:3000");
        assert_eq!(config.websocket_url, "ws://localhost:3000");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.clock.settings().tick_time, Duration::from_millis(250));
        assert!(!config.clock.auto_start);
        assert!(!config.has_api_credentials());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_env_override_urls() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = ClientConfig::default();
        env::set_var("MEKA_API_URL", "https://api.example.com");
        env::set_var("MEKA_WEBSOCKET_URL", "wss://ws.example.com");
        config.apply_env_overrides();

        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.websocket_url, "wss://ws.example.com");
    }

    #[test]
    fn test_env_override_credentials() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = ClientConfig::default();
        env::set_var("MEKA_API_KEY", "key");
        env::set_var("MEKA_API_SECRET", "secret");
        config.apply_env_overrides();
        assert!(config.has_api_credentials());

        // Empty string clears it
        env::set_var("MEKA_API_KEY", "");
        config.apply_env_overrides();
        assert!(config.api_key.is_none());
        assert!(!config.has_api_credentials());
    }

    #[test]
    fn test_env_override_timeout() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = ClientConfig::default();
        env::set_var("MEKA_CONNECT_TIMEOUT_SECS", "3");
        config.apply_env_overrides();
        assert_eq!(config.connect_timeout_secs, 3);

        env::set_var("MEKA_CONNECT_TIMEOUT_SECS", "soon");
        config.apply_env_overrides();
        assert_eq!(config.connect_timeout_secs, 3);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            api_url = "https://api.meka.dev"
            jwt = "preset"

            [clock]
            tick_time_ms = 100
            auto_start = true
        "#;

        let config = ClientConfig::load_from_str(toml).unwrap();
        assert_eq!(config.api_url, "https://api.meka.dev");
        assert_eq!(config.websocket_url, "ws://localhost:3000");
        assert_eq!(config.jwt.as_deref(), Some("preset"));
        assert_eq!(config.clock.tick_time_ms, 100);
        assert_eq!(config.clock.tick_count, 0);
        assert!(config.clock.settings().auto_start);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("meka").join("config.toml");

        let config = ClientConfig {
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            connect_timeout_secs: 5,
            ..Default::default()
        };
        config.save_to_path(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("api_key"));
        assert!(!content.contains("jwt"));

        let loaded = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_path_override() {
        let _guard = EnvGuard::new(ENV_VARS);

        assert!(ClientConfig::config_file_path().ends_with("meka/config.toml"));
        env::set_var("MEKA_CONFIG", "/tmp/meka-test.toml");
        assert_eq!(
            ClientConfig::config_file_path(),
            PathBuf::from("/tmp/meka-test.toml")
        );
    }
}
