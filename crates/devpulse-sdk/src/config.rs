//! Client configuration

use devpulse_core::config::DeliverySettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for a [`MetricsClient`](crate::MetricsClient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the metrics API
    pub base_url: String,

    /// Device id stamped on snapshots built by `post_metrics`
    pub device_id: Option<i64>,

    /// Directory holding snapshots that could not be delivered
    pub offline_storage_path: PathBuf,

    /// Delivery attempts per snapshot (values below 1 act as 1)
    pub max_retries: u32,

    /// Base delay between attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&DeliverySettings::default(), None)
    }
}

impl ClientConfig {
    /// Create config for the given API and storage directory
    pub fn new(base_url: impl Into<String>, offline_storage_path: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            offline_storage_path: offline_storage_path.into(),
            ..Default::default()
        }
    }

    /// Build from the `[delivery]` config section
    pub fn from_settings(settings: &DeliverySettings, device_id: Option<i64>) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            device_id,
            offline_storage_path: settings.offline_storage_path.clone(),
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
            request_timeout_ms: settings.request_timeout_ms,
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DEVPULSE_API_URL") {
            config.base_url = val;
        }
        if let Ok(val) = std::env::var("DEVPULSE_DEVICE_ID") {
            config.device_id = val.parse().ok();
        }
        if let Ok(val) = std::env::var("DEVPULSE_OFFLINE_PATH") {
            config.offline_storage_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("DEVPULSE_MAX_RETRIES") {
            config.max_retries = val.parse().unwrap_or(config.max_retries);
        }
        if let Ok(val) = std::env::var("DEVPULSE_RETRY_DELAY_MS") {
            config.retry_delay_ms = val.parse().unwrap_or(config.retry_delay_ms);
        }

        config
    }

    /// Set the device id
    pub fn with_device_id(mut self, device_id: i64) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Set retry count and base delay
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay.as_millis() as u64;
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Get retry delay as Duration
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
