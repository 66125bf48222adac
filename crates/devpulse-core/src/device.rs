//! Device registration types

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// Request body for registering a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Unique device name
    #[serde(default)]
    pub name: String,

    /// Free-form device type, e.g. "laptop" or "server"
    #[serde(default)]
    pub device_type: String,
}

impl DeviceRegistration {
    pub fn new(name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.into(),
        }
    }

    /// Both fields must be non-empty
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.device_type.trim().is_empty() {
            return Err(ValidationError::MissingField("device_type"));
        }
        Ok(())
    }
}

/// Successful registration response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceRegistered {
    pub message: String,
    pub device_id: i64,
}

/// Host name used as the default device name
pub fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
