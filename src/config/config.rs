use crate::api::client::DEFAULT_BASE_URL;
use crate::utils::app_paths::AppPaths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable that overrides `api.base_url`
pub const BASE_URL_ENV: &str = "SLTAX_API_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub credentials: CredentialConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Root URL of the tax service, without a trailing slash
    pub base_url: String,

    /// Whole-request timeout; a timeout surfaces as a transport error
    pub timeout_secs: u64,

    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Primary key store (TOML). Defaults to settings.toml in the config dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,

    /// Fallback key store (JSON). Defaults to credentials.json in the data dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_file: Option<PathBuf>,

    /// Let SLTAX_API_KEY take precedence over stored keys
    pub use_env: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set, e.g. "info" or "sltax=debug"
    pub level: String,

    /// Write to a timestamped file in the log dir instead of stderr
    pub log_to_file: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            user_agent: format!("sltax/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            settings_file: None,
            fallback_file: None,
            use_env: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl Config {
    /// Load config from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            // Create default config if it doesn't exist
            let default_config = Self::default();
            default_config.save()?;
            return Ok(default_config.with_env_overrides());
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;

        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            if !base_url.trim().is_empty() {
                info!("Using API base URL from {}", BASE_URL_ENV);
                self.api.base_url = base_url.trim().to_string();
            }
        }
        self
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;

        Ok(())
    }

    /// Get the default config file path
    pub fn get_config_path() -> Result<PathBuf> {
        AppPaths::config_file()
    }

    /// Create a default config file with comments
    pub fn create_default_with_comments() -> String {
        format!(
            r#"# sltax Configuration File
# Location: ~/.config/sltax/config.toml (Linux)
#           ~/Library/Application Support/sltax/config.toml (macOS)
#           %APPDATA%\sltax\config.toml (Windows)

[api]
# Root URL of the surplus lines tax service
# Can be overridden with the {env} environment variable
base_url = "{base_url}"

# Request timeout in seconds; timeouts are reported as transport errors
timeout_secs = 30

[credentials]
# Primary API key store (TOML). Leave commented to use the default location
# settings_file = "/path/to/settings.toml"

# Fallback API key store (JSON). Leave commented to use the default location
# fallback_file = "/path/to/credentials.json"

# Let the SLTAX_API_KEY environment variable take precedence
use_env = true

[logging]
# Log filter used when RUST_LOG is not set
level = "info"

# Write logs to a file in the data directory instead of stderr
log_to_file = false
"#,
            env = BASE_URL_ENV,
            base_url = DEFAULT_BASE_URL
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api.timeout_secs, 30);
        assert!(config.credentials.use_env);
        assert!(!config.logging.log_to_file);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[api]
timeout_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(config.api.timeout_secs, 5);
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_commented_template_parses() {
        let config: Config = toml::from_str(&Config::create_default_with_comments()).unwrap();
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert!(config.credentials.settings_file.is_none());
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.api.timeout_secs = 12;
        config.credentials.fallback_file = Some(dir.path().join("creds.json"));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api.timeout_secs, 12);
        assert_eq!(
            loaded.credentials.fallback_file,
            Some(dir.path().join("creds.json"))
        );
    }

    #[test]
    fn test_invalid_config_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[api\nbase_url = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }
}
