//! devpulse agent - periodic host metrics collection
//!
//! Collects system and crypto metrics on a fixed interval, submits them
//! through the SDK's store-and-forward client, and executes remote
//! commands queued for the device.

pub mod agent;
pub mod crypto;
pub mod error;
pub mod host;

pub use agent::{Agent, AgentConfig, AgentStats, CommandHandler};
pub use crypto::CryptoCollector;
pub use error::{AgentError, AgentResult};
pub use host::HostCollector;
