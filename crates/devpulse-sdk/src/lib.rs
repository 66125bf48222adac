//! devpulse SDK - store-and-forward metrics delivery
//!
//! This crate gets locally produced snapshots to the devpulse API without
//! losing them to network or server outages.
//!
//! ## Features
//!
//! - **Delivery Engine** - bounded retries with linear backoff, tagged results
//! - **Offline Store** - one JSON file per undelivered snapshot, atomic writes
//! - **Recovery Sweeper** - replays stored snapshots once the API is back
//! - **API Client** - retrieval, device registration, and remote commands
//!
//! ## Quick Start
//!
//! ```no_run
//! use devpulse_sdk::{ClientConfig, MetricsClient};
//! use devpulse_core::SystemMetrics;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("http://localhost:5000", "/tmp/devpulse-offline")
//!         .with_device_id(1);
//!
//!     // Replays anything left over from a previous run
//!     let client = MetricsClient::connect(config).await?;
//!
//!     let outcome = client
//!         .post_metrics(Some(SystemMetrics::new(10, 75.5)?), None)
//!         .await?;
//!     println!("{:?}", outcome);
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod offline_store;
pub mod sweeper;
pub mod types;

// Re-exports
pub use client::{ClientStats, HttpClient, MetricsClient, SubmitOutcome};
pub use config::ClientConfig;
pub use delivery::{DeliveryEngine, DeliveryResult, RetryPolicy, SnapshotTransport};
pub use error::{SdkError, SdkResult, StorageError, StorageResult};
pub use offline_store::{OfflineStore, PendingEntries, PendingEntry, StoreStats};
pub use sweeper::{RecoverySweeper, SweepReport};
pub use types::{ApiErrorBody, HealthStatus, IngestReceipt};
