//! devpulse core - snapshot model, API types, and configuration
//!
//! This crate provides the types shared by every devpulse component:
//!
//! - **Snapshot**: the immutable measurement bundle sent by devices
//! - **Devices & Commands**: registration and remote command payloads
//! - **Queries**: retrieval filters and listing summaries
//! - **Config**: TOML configuration discovery and overrides

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod query;
pub mod snapshot;

// Re-export commonly used types
pub use command::{
    CommandRequest, CommandStatus, CommandType, DeviceCommand, RestartAppParams,
};
pub use config::{AppConfig, ConfigError, ConfigLoader, ConfigResult};
pub use device::{DeviceRegistered, DeviceRegistration};
pub use error::{ValidationError, ValidationResult};
pub use query::{SnapshotQuery, SnapshotSummary, SummaryQuery, DEFAULT_QUERY_LIMIT};
pub use snapshot::{CryptoMetrics, Snapshot, SystemMetrics};

/// devpulse version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
