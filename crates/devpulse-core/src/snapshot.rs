//! Metrics snapshot model
//!
//! A [`Snapshot`] is one measurement taken on a device: a timestamp plus
//! optional system and crypto metric groups. The same JSON serialization is
//! used on the wire and in offline record files.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host metrics sampled on the reporting device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemMetrics {
    /// Number of threads in the reporting process
    pub thread_count: u32,

    /// RAM usage as a percentage of total memory (0-100)
    pub ram_usage_percent: f64,
}

impl SystemMetrics {
    /// Create system metrics, checking the RAM percentage range
    pub fn new(thread_count: u32, ram_usage_percent: f64) -> Result<Self, ValidationError> {
        let metrics = Self {
            thread_count,
            ram_usage_percent,
        };
        metrics.validate()?;
        Ok(metrics)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.ram_usage_percent.is_finite() || !(0.0..=100.0).contains(&self.ram_usage_percent)
        {
            return Err(ValidationError::RamUsageOutOfRange(self.ram_usage_percent));
        }
        Ok(())
    }
}

/// Cryptocurrency quotes in USD
///
/// Either price may be missing when the quote source was unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CryptoMetrics {
    /// Bitcoin price in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitcoin_price_usd: Option<f64>,

    /// Ethereum price in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ethereum_price_usd: Option<f64>,
}

impl CryptoMetrics {
    /// Create crypto metrics, checking that present prices are non-negative
    pub fn new(
        bitcoin_price_usd: Option<f64>,
        ethereum_price_usd: Option<f64>,
    ) -> Result<Self, ValidationError> {
        let metrics = Self {
            bitcoin_price_usd,
            ethereum_price_usd,
        };
        metrics.validate()?;
        Ok(metrics)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_price("bitcoin_price_usd", self.bitcoin_price_usd)?;
        check_price("ethereum_price_usd", self.ethereum_price_usd)
    }

    /// True when neither price is known
    pub fn is_empty(&self) -> bool {
        self.bitcoin_price_usd.is_none() && self.ethereum_price_usd.is_none()
    }
}

fn check_price(field: &'static str, value: Option<f64>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ValidationError::InvalidPrice { field, value: v }),
        _ => Ok(()),
    }
}

/// One immutable measurement bundle
///
/// Fields are private; use the accessors. Absent metric groups are omitted
/// from the serialized form rather than written as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    device_id: i64,

    timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_metrics: Option<SystemMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    crypto_metrics: Option<CryptoMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot_id: Option<i64>,
}

impl Snapshot {
    /// Create a snapshot with no metric groups
    pub fn new(device_id: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id,
            timestamp,
            system_metrics: None,
            crypto_metrics: None,
            snapshot_id: None,
        }
    }

    /// Create a snapshot stamped with the current time
    pub fn now(device_id: i64) -> Self {
        Self::new(device_id, Utc::now())
    }

    /// Return a copy carrying the given system metrics
    pub fn with_system_metrics(self, metrics: SystemMetrics) -> Self {
        Self {
            system_metrics: Some(metrics),
            ..self
        }
    }

    /// Return a copy carrying the given crypto metrics
    pub fn with_crypto_metrics(self, metrics: CryptoMetrics) -> Self {
        Self {
            crypto_metrics: Some(metrics),
            ..self
        }
    }

    /// Return a copy carrying the server-assigned id
    pub fn with_snapshot_id(self, snapshot_id: i64) -> Self {
        Self {
            snapshot_id: Some(snapshot_id),
            ..self
        }
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn system_metrics(&self) -> Option<&SystemMetrics> {
        self.system_metrics.as_ref()
    }

    pub fn crypto_metrics(&self) -> Option<&CryptoMetrics> {
        self.crypto_metrics.as_ref()
    }

    pub fn snapshot_id(&self) -> Option<i64> {
        self.snapshot_id
    }

    /// Check every present metric group
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.device_id <= 0 {
            return Err(ValidationError::InvalidDeviceId(self.device_id));
        }
        if let Some(system) = &self.system_metrics {
            system.validate()?;
        }
        if let Some(crypto) = &self.crypto_metrics {
            crypto.validate()?;
        }
        Ok(())
    }

    /// Serialize to the wire/offline JSON form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse from the wire/offline JSON form
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
