//! Metrics client
//!
//! Central client that submits snapshots with store-and-forward delivery and
//! wraps the rest of the devpulse API.

mod http;

pub use http::HttpClient;

use crate::config::ClientConfig;
use crate::delivery::{DeliveryEngine, DeliveryResult, RetryPolicy, SnapshotTransport};
use crate::error::{SdkError, SdkResult};
use crate::offline_store::{OfflineStore, StoreStats};
use crate::sweeper::{RecoverySweeper, SweepReport};
use crate::types::HealthStatus;
use devpulse_core::{
    CommandRequest, CommandStatus, CryptoMetrics, DeviceCommand, DeviceRegistration, Snapshot,
    SnapshotQuery, SnapshotSummary, SummaryQuery, SystemMetrics,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// What `submit` did with a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the server
    Delivered { snapshot_id: Option<i64> },

    /// Stored offline for a later sweep
    Queued { path: PathBuf },

    /// Rejected by the server and dropped
    Discarded { reason: String },
}

impl SubmitOutcome {
    /// True when the snapshot is either delivered or safely stored
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SubmitOutcome::Discarded { .. })
    }
}

/// Client counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Snapshots delivered on submit
    pub delivered: u64,

    /// Snapshots stored offline
    pub queued: u64,

    /// Snapshots rejected by the server (submit and sweep)
    pub discarded: u64,

    /// Stored snapshots delivered by a sweep
    pub replayed: u64,
}

/// devpulse API client with offline buffering
pub struct MetricsClient {
    config: ClientConfig,
    http: HttpClient,
    store: OfflineStore,
    engine: DeliveryEngine,
    sweeper: RecoverySweeper,
    sweep_lock: Mutex<()>,
    device_id: RwLock<Option<i64>>,

    // Stats
    delivered: AtomicU64,
    queued: AtomicU64,
    discarded: AtomicU64,
    replayed: AtomicU64,
}

impl MetricsClient {
    /// Create a client that delivers over HTTP
    pub fn new(config: ClientConfig) -> SdkResult<Self> {
        let http = HttpClient::new(&config.base_url, config.request_timeout())?;
        let transport: Arc<dyn SnapshotTransport> = Arc::new(http.clone());
        Self::build(config, http, transport)
    }

    /// Create a client that delivers snapshots through a custom transport
    ///
    /// Non-delivery calls still go over HTTP to `config.base_url`.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn SnapshotTransport>,
    ) -> SdkResult<Self> {
        let http = HttpClient::new(&config.base_url, config.request_timeout())?;
        Self::build(config, http, transport)
    }

    fn build(
        config: ClientConfig,
        http: HttpClient,
        transport: Arc<dyn SnapshotTransport>,
    ) -> SdkResult<Self> {
        let store = OfflineStore::open(&config.offline_storage_path)?;
        let policy = RetryPolicy::new(config.max_retries, config.retry_delay());
        let engine = DeliveryEngine::new(transport, policy);
        let sweeper = RecoverySweeper::new(store.clone(), engine.clone());

        Ok(Self {
            device_id: RwLock::new(config.device_id),
            config,
            http,
            store,
            engine,
            sweeper,
            sweep_lock: Mutex::new(()),
            delivered: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
        })
    }

    /// Create a client and replay any stored backlog
    pub async fn connect(config: ClientConfig) -> SdkResult<Self> {
        let client = Self::new(config)?;
        let report = client.sweep().await?;
        if report.retained > 0 {
            warn!(
                "{} offline snapshots still pending after startup sweep",
                report.retained
            );
        }
        Ok(client)
    }

    /// Get configuration reference
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get HTTP client reference
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Get offline store reference
    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    /// Device id used by `post_metrics` and the command helpers
    pub fn device_id(&self) -> Option<i64> {
        *self.device_id.read()
    }

    pub fn set_device_id(&self, device_id: i64) {
        *self.device_id.write() = Some(device_id);
    }

    fn require_device_id(&self) -> SdkResult<i64> {
        self.device_id()
            .ok_or_else(|| SdkError::Config("no device id configured".to_string()))
    }

    /// Deliver a snapshot, storing it offline if the server stays unreachable
    ///
    /// Returns `Err` only when the snapshot had to be stored and storing failed.
    pub async fn submit(&self, snapshot: &Snapshot) -> SdkResult<SubmitOutcome> {
        match self.engine.attempt_delivery(snapshot).await {
            DeliveryResult::Success { snapshot_id } => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(SubmitOutcome::Delivered { snapshot_id })
            }
            DeliveryResult::PermanentFailure { reason } => {
                error!("Snapshot discarded: {}", reason);
                self.discarded.fetch_add(1, Ordering::Relaxed);
                Ok(SubmitOutcome::Discarded { reason })
            }
            DeliveryResult::TransientFailureExhausted {
                attempts,
                last_error,
                ..
            } => {
                let path = self.store.persist(snapshot)?;
                self.queued.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Delivery failed after {} attempts ({}), stored offline at {}",
                    attempts,
                    last_error,
                    path.display()
                );
                Ok(SubmitOutcome::Queued { path })
            }
        }
    }

    /// Build a snapshot for the configured device at the current time and submit it
    pub async fn post_metrics(
        &self,
        system: Option<SystemMetrics>,
        crypto: Option<CryptoMetrics>,
    ) -> SdkResult<SubmitOutcome> {
        let mut snapshot = Snapshot::now(self.require_device_id()?);
        if let Some(system) = system {
            snapshot = snapshot.with_system_metrics(system);
        }
        if let Some(crypto) = crypto {
            snapshot = snapshot.with_crypto_metrics(crypto);
        }
        self.submit(&snapshot).await
    }

    /// Replay the offline backlog; concurrent calls run one at a time
    pub async fn sweep(&self) -> SdkResult<SweepReport> {
        let _guard = self.sweep_lock.lock().await;
        let report = self.sweeper.sweep().await?;
        self.replayed
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.discarded
            .fetch_add(report.discarded as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Fetch stored snapshots, newest first
    pub async fn fetch_snapshots(&self, query: &SnapshotQuery) -> SdkResult<Vec<Snapshot>> {
        self.http.fetch_snapshots(query).await
    }

    /// Fetch snapshot summaries, newest first
    pub async fn snapshot_summaries(
        &self,
        query: &SummaryQuery,
    ) -> SdkResult<Vec<SnapshotSummary>> {
        self.http.snapshot_summaries(query).await
    }

    /// Register a device and return its id
    pub async fn register_device(&self, registration: &DeviceRegistration) -> SdkResult<i64> {
        let registered = self.http.register_device(registration).await?;
        info!(
            "Registered device {} with id {}",
            registration.name, registered.device_id
        );
        Ok(registered.device_id)
    }

    /// Register a device, reusing the existing id if the name is taken
    pub async fn ensure_device(&self, registration: &DeviceRegistration) -> SdkResult<i64> {
        match self.register_device(registration).await {
            Ok(id) => Ok(id),
            Err(SdkError::Conflict {
                device_id: Some(id),
                ..
            }) => {
                info!("Device {} already registered with id {}", registration.name, id);
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Queue a command for any device
    pub async fn send_command(
        &self,
        device_id: i64,
        request: &CommandRequest,
    ) -> SdkResult<DeviceCommand> {
        self.http.send_command(device_id, request).await
    }

    /// Queue a `restart_app` command for the configured device
    pub async fn restart_app(&self, app_name: &str, force: bool) -> SdkResult<DeviceCommand> {
        let device_id = self.require_device_id()?;
        let command = self
            .send_command(device_id, &CommandRequest::restart_app(app_name, force))
            .await?;
        info!(
            "Queued restart of {} on device {} (command {})",
            app_name, device_id, command.command_id
        );
        Ok(command)
    }

    /// Pending commands for the configured device
    pub async fn pending_commands(&self) -> SdkResult<Vec<DeviceCommand>> {
        self.list_commands(Some(CommandStatus::Pending)).await
    }

    /// Commands for the configured device, optionally filtered by status
    pub async fn list_commands(
        &self,
        status: Option<CommandStatus>,
    ) -> SdkResult<Vec<DeviceCommand>> {
        let device_id = self.require_device_id()?;
        self.http.list_commands(device_id, status).await
    }

    /// Mark a command for the configured device as handled
    pub async fn acknowledge_command(&self, command_id: i64) -> SdkResult<DeviceCommand> {
        let device_id = self.require_device_id()?;
        self.http.acknowledge_command(device_id, command_id).await
    }

    /// Check server health
    pub async fn health(&self) -> SdkResult<HealthStatus> {
        self.http.health().await
    }

    /// Offline backlog size
    pub fn pending_stats(&self) -> SdkResult<StoreStats> {
        Ok(self.store.stats()?)
    }

    /// Get client statistics
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
        }
    }
}
