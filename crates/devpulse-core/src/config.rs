//! Configuration system for devpulse
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DEVPULSE_CONFIG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete devpulse configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logging settings
    pub logging: LoggingSettings,

    /// Collection agent settings
    pub agent: AgentSettings,

    /// Client-side delivery settings
    pub delivery: DeliverySettings,

    /// API server settings
    pub server: ServerSettings,

    /// Terminal dashboard settings
    pub dashboard: DashboardSettings,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Append log output to this file as well as stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

/// Collection agent settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Server-assigned device id (registered on first start when unset)
    pub device_id: Option<i64>,

    /// Device name used for registration (defaults to the host name)
    pub device_name: Option<String>,

    /// Device type used for registration
    pub device_type: String,

    /// Seconds between metric collections
    pub interval_secs: u64,

    /// Seconds between offline backlog sweeps
    pub sweep_interval_secs: u64,

    /// Seconds between pending command polls
    pub command_poll_secs: u64,

    /// Fetch crypto quotes each cycle
    pub crypto_enabled: bool,

    /// Base URL of a CoinGecko-compatible API
    pub crypto_endpoint: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            device_id: None,
            device_name: None,
            device_type: "desktop".to_string(),
            interval_secs: 60,
            sweep_interval_secs: 300,
            command_poll_secs: 30,
            crypto_enabled: true,
            crypto_endpoint: "https://api.coingecko.com/api/v3".to_string(),
        }
    }
}

impl AgentSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn command_poll(&self) -> Duration {
        Duration::from_secs(self.command_poll_secs)
    }
}

/// Client-side delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Base URL of the metrics API
    pub base_url: String,

    /// Directory holding snapshots that could not be delivered
    pub offline_storage_path: PathBuf,

    /// Delivery attempts per snapshot
    pub max_retries: u32,

    /// Base delay between attempts; attempt n waits n times this
    pub retry_delay_ms: u64,

    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            offline_storage_path: default_offline_path(),
            max_retries: 3,
            retry_delay_ms: 1000,
            request_timeout_ms: 10_000,
        }
    }
}

impl DeliverySettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// API server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind
    pub host: String,

    /// Port to bind
    pub port: u16,

    /// SQLite database file
    pub database_path: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            database_path: PathBuf::from("metrics.db"),
        }
    }
}

/// Terminal dashboard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    /// Seconds between API refreshes
    pub refresh_secs: u64,

    /// Snapshots fetched per refresh
    pub history_limit: u32,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            refresh_secs: 5,
            history_limit: 100,
        }
    }
}

impl DashboardSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

fn default_offline_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("devpulse").join("offline"))
        .unwrap_or_else(|| PathBuf::from("offline_metrics"))
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. DEVPULSE_CONFIG environment variable
    /// 3. ~/.config/devpulse/config.toml
    /// 4. /etc/devpulse/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<AppConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                AppConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Self::validate(&config)?;

        Ok(config)
    }

    /// The config file `load` would read, if any
    pub fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("{} path does not exist: {}", CONFIG_ENV_VAR, env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/devpulse/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<AppConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `DEVPULSE_*` overrides read through `lookup`
    fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Logging
        if let Some(val) = lookup("DEVPULSE_LOG_LEVEL") {
            config.logging.level = val;
        }
        if let Some(val) = lookup("DEVPULSE_LOG_FILE") {
            config.logging.file = Some(PathBuf::from(val));
        }

        // Agent
        if let Some(val) = lookup("DEVPULSE_DEVICE_ID") {
            if let Ok(id) = val.parse() {
                config.agent.device_id = Some(id);
            }
        }
        if let Some(val) = lookup("DEVPULSE_DEVICE_NAME") {
            config.agent.device_name = Some(val);
        }
        if let Some(val) = lookup("DEVPULSE_INTERVAL_SECS") {
            config.agent.interval_secs = val.parse().unwrap_or(config.agent.interval_secs);
        }
        if let Some(val) = lookup("DEVPULSE_CRYPTO_ENABLED") {
            config.agent.crypto_enabled = val.parse().unwrap_or(config.agent.crypto_enabled);
        }
        if let Some(val) = lookup("DEVPULSE_CRYPTO_ENDPOINT") {
            config.agent.crypto_endpoint = val;
        }

        // Delivery
        if let Some(val) = lookup("DEVPULSE_API_URL") {
            config.delivery.base_url = val;
        }
        if let Some(val) = lookup("DEVPULSE_OFFLINE_PATH") {
            config.delivery.offline_storage_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("DEVPULSE_MAX_RETRIES") {
            config.delivery.max_retries = val.parse().unwrap_or(config.delivery.max_retries);
        }
        if let Some(val) = lookup("DEVPULSE_RETRY_DELAY_MS") {
            config.delivery.retry_delay_ms =
                val.parse().unwrap_or(config.delivery.retry_delay_ms);
        }

        // Server
        if let Some(val) = lookup("DEVPULSE_SERVER_HOST") {
            config.server.host = val;
        }
        if let Some(val) = lookup("DEVPULSE_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                config.server.port = port;
            }
        }
        if let Some(val) = lookup("DEVPULSE_DATABASE_PATH") {
            config.server.database_path = PathBuf::from(val);
        }
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.logging.level, valid_levels
            )));
        }

        let base_url = config.delivery.base_url.as_str();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid delivery base_url: {}. Must start with http:// or https://",
                base_url
            )));
        }

        if let Some(id) = config.agent.device_id {
            if id <= 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid agent device_id: {}",
                    id
                )));
            }
        }

        let intervals = [
            ("agent.interval_secs", config.agent.interval_secs),
            ("agent.sweep_interval_secs", config.agent.sweep_interval_secs),
            ("agent.command_poll_secs", config.agent.command_poll_secs),
            ("dashboard.refresh_secs", config.dashboard.refresh_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{} cannot be 0", name)));
            }
        }

        if config.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(config: &AppConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("devpulse").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
