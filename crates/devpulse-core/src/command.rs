//! Remote device commands
//!
//! Commands are queued on the server for a device and picked up by the agent
//! running on that device. The only command type today is `restart_app`.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// Restart an application on the device
    RestartApp,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::RestartApp => "restart_app",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restart_app" => Ok(CommandType::RestartApp),
            other => Err(ValidationError::UnknownCommand(other.to_string())),
        }
    }
}

/// Lifecycle state of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Acknowledged,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Acknowledged => "acknowledged",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommandStatus::Pending),
            "acknowledged" => Ok(CommandStatus::Acknowledged),
            other => Err(format!("unknown command status: {}", other)),
        }
    }
}

/// Parameters of a `restart_app` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartAppParams {
    /// Application to restart
    pub app_name: String,

    /// Kill the application instead of asking it to quit
    #[serde(default)]
    pub force: bool,
}

/// Request body for queueing a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandRequest {
    pub command_type: CommandType,

    #[serde(default)]
    pub params: serde_json::Value,
}

impl CommandRequest {
    /// Build a `restart_app` request
    pub fn restart_app(app_name: impl Into<String>, force: bool) -> Self {
        Self {
            command_type: CommandType::RestartApp,
            params: serde_json::json!({
                "app_name": app_name.into(),
                "force": force,
            }),
        }
    }

    /// Check that the params match the command type
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.command_type {
            CommandType::RestartApp => {
                let params: RestartAppParams = serde_json::from_value(self.params.clone())
                    .map_err(|_| ValidationError::MissingField("params.app_name"))?;
                if params.app_name.trim().is_empty() {
                    return Err(ValidationError::MissingField("params.app_name"));
                }
                Ok(())
            }
        }
    }
}

/// A command as stored and returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceCommand {
    pub command_id: i64,
    pub device_id: i64,
    pub command_type: CommandType,
    pub params: serde_json::Value,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl DeviceCommand {
    /// Typed params for a `restart_app` command
    pub fn restart_params(&self) -> Option<RestartAppParams> {
        match self.command_type {
            CommandType::RestartApp => serde_json::from_value(self.params.clone()).ok(),
        }
    }
}
