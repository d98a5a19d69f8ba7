//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default service URL (can be overridden at compile time via DESK_SERVICE_URL env var).
pub const DEFAULT_SERVICE_URL: &str = match option_env!("DESK_SERVICE_URL") {
    Some(url) => url,
    None => "https://api.servicedesk.app",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_NEAR_EXPIRY_LEEWAY_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Service URL used before an endpoint has been enrolled.
    #[serde(default = "default_service_url")]
    pub service_url: String,
    /// Keychain service name that namespaces every stored entry.
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,
    /// Access tokens closer than this to expiry are renewed before use.
    #[serde(default = "default_near_expiry_leeway_secs")]
    pub near_expiry_leeway_secs: u64,
    /// Transport timeout for code exchange and refresh requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_service_url() -> String {
    DEFAULT_SERVICE_URL.to_string()
}

fn default_keychain_service() -> String {
    // Mirrors desk_storage::SERVICE_NAME without a dependency on the storage crate.
    "app.servicedesk.client".to_string()
}

fn default_near_expiry_leeway_secs() -> u64 {
    DEFAULT_NEAR_EXPIRY_LEEWAY_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            service_url: default_service_url(),
            keychain_service: default_keychain_service(),
            near_expiry_leeway_secs: DEFAULT_NEAR_EXPIRY_LEEWAY_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("DESK_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(service_url) = std::env::var("DESK_SERVICE_URL") {
            if !service_url.trim().is_empty() {
                self.service_url = service_url.trim().to_string();
            }
        }
    }

    /// Reject values the session layer cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        self.service_url()?;
        if self.keychain_service.trim().is_empty() {
            return Err(CoreError::Config(
                "keychain_service must not be empty".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the service URL as a parsed URL.
    pub fn service_url(&self) -> CoreResult<Url> {
        Url::parse(&self.service_url).map_err(CoreError::from)
    }

    /// Leeway before access-token expiry at which renewal kicks in.
    pub fn near_expiry_leeway(&self) -> Duration {
        Duration::from_secs(self.near_expiry_leeway_secs)
    }

    /// Transport timeout for auth requests.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.service_url, DEFAULT_SERVICE_URL);
        assert_eq!(config.keychain_service, "app.servicedesk.client");
        assert_eq!(config.near_expiry_leeway(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_load_from_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "near_expiry_leeway_secs": 120
        }"#;
        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.near_expiry_leeway_secs, 120);
        assert_eq!(config.service_url, DEFAULT_SERVICE_URL);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.log_level = "trace".to_string();
        config.request_timeout_secs = 5;

        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.request_timeout_secs, 5);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.keychain_service, "app.servicedesk.client");
    }

    #[test]
    fn test_config_service_url_parse() {
        let config = Config::default();
        let url = config.service_url().unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.service_url = "not a valid url".to_string();

        assert!(config.service_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let mut config = Config::default();
        config.request_timeout_secs = 0;

        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_config_rejects_empty_keychain_service() {
        let mut config = Config::default();
        config.keychain_service = "  ".to_string();

        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
