//! Collection loop
//!
//! One task drives three timers: metric collection, backlog sweeps and
//! command polling. Sweeps run on a spawned task so a large backlog never
//! holds up collection. Errors are logged and counted, never returned from
//! [`Agent::run`].

use crate::crypto::CryptoCollector;
use crate::error::AgentResult;
use crate::host::HostCollector;
use devpulse_core::config::AgentSettings;
use devpulse_core::device::default_device_name;
use devpulse_core::{CommandType, DeviceCommand, DeviceRegistration, Snapshot};
use devpulse_sdk::{MetricsClient, SubmitOutcome};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Agent loop configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Interval between collections
    pub interval: Duration,

    /// Interval between backlog sweeps
    pub sweep_interval: Duration,

    /// Interval between pending command polls
    pub command_poll: Duration,

    /// Consecutive failures before logging at error level
    pub max_failures: u32,

    /// Registration used when the client has no device id
    pub registration: DeviceRegistration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default())
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        let name = settings
            .device_name
            .clone()
            .unwrap_or_else(default_device_name);

        Self {
            interval: settings.interval(),
            sweep_interval: settings.sweep_interval(),
            command_poll: settings.command_poll(),
            max_failures: 5,
            registration: DeviceRegistration::new(name, settings.device_type.clone()),
        }
    }
}

/// Callback for handling remote commands
pub type CommandHandler = Arc<dyn Fn(&DeviceCommand) + Send + Sync>;

/// Agent counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStats {
    /// Collection cycles run
    pub cycles: u64,

    /// Cycles whose snapshot was not delivered right away
    pub failed_cycles: u64,

    /// Current consecutive failed cycles
    pub consecutive_failures: u64,

    /// Commands dispatched and acknowledged
    pub commands_handled: u64,
}

/// Periodic metrics agent
pub struct Agent {
    client: Arc<MetricsClient>,
    config: AgentConfig,
    host: HostCollector,
    crypto: Option<CryptoCollector>,
    command_handler: CommandHandler,

    // Stats
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    consecutive_failures: AtomicU64,
    commands_handled: AtomicU64,
}

impl Agent {
    /// Create an agent that collects host metrics only
    pub fn new(client: Arc<MetricsClient>, config: AgentConfig) -> Self {
        Self {
            client,
            config,
            host: HostCollector::new(),
            crypto: None,
            command_handler: Arc::new(log_command),
            cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            commands_handled: AtomicU64::new(0),
        }
    }

    /// Create an agent from the `[agent]` config section
    pub fn from_settings(client: Arc<MetricsClient>, settings: &AgentSettings) -> AgentResult<Self> {
        let mut agent = Self::new(client, AgentConfig::from_settings(settings));
        if settings.crypto_enabled {
            let timeout = agent.client.config().request_timeout();
            agent = agent.with_crypto(CryptoCollector::new(&settings.crypto_endpoint, timeout)?);
        }
        Ok(agent)
    }

    /// Attach crypto quotes to each snapshot
    pub fn with_crypto(mut self, collector: CryptoCollector) -> Self {
        self.crypto = Some(collector);
        self
    }

    /// Replace the default command handler, which only logs
    pub fn with_command_handler(mut self, handler: CommandHandler) -> Self {
        self.command_handler = handler;
        self
    }

    pub fn client(&self) -> &Arc<MetricsClient> {
        &self.client
    }

    /// Resolve the device id, registering the device if needed
    pub async fn ensure_registered(&self) -> AgentResult<i64> {
        if let Some(device_id) = self.client.device_id() {
            return Ok(device_id);
        }

        let device_id = self.client.ensure_device(&self.config.registration).await?;
        self.client.set_device_id(device_id);
        info!(
            "Collecting as device {} ({})",
            device_id, self.config.registration.name
        );
        Ok(device_id)
    }

    /// Build a snapshot from fresh readings
    ///
    /// A failed host reading leaves system metrics out of the snapshot.
    pub async fn collect(&self) -> AgentResult<Snapshot> {
        let device_id = self.ensure_registered().await?;
        let mut snapshot = Snapshot::now(device_id);

        match self.host.collect() {
            Ok(system) => snapshot = snapshot.with_system_metrics(system),
            Err(e) => warn!("Skipping system metrics: {}", e),
        }

        if let Some(crypto) = &self.crypto {
            snapshot = snapshot.with_crypto_metrics(crypto.collect().await);
        }

        Ok(snapshot)
    }

    /// Collect and submit one snapshot
    pub async fn run_cycle(&self) -> AgentResult<SubmitOutcome> {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.collect().await?;
        Ok(self.client.submit(&snapshot).await?)
    }

    /// Dispatch pending commands to the handler and acknowledge them
    ///
    /// Returns the number of commands handled. Does nothing until the device
    /// is registered.
    pub async fn poll_commands(&self) -> AgentResult<usize> {
        if self.client.device_id().is_none() {
            return Ok(0);
        }

        let commands = self.client.pending_commands().await?;
        let mut handled = 0;
        for command in &commands {
            info!(
                "Received command {} ({})",
                command.command_id, command.command_type
            );
            (self.command_handler)(command);
            self.client.acknowledge_command(command.command_id).await?;
            self.commands_handled.fetch_add(1, Ordering::Relaxed);
            handled += 1;
        }
        Ok(handled)
    }

    /// Run until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting agent: collect every {}s, sweep every {}s, poll commands every {}s",
            self.config.interval.as_secs(),
            self.config.sweep_interval.as_secs(),
            self.config.command_poll.as_secs()
        );

        let mut sweep_task = self.spawn_sweep();

        let mut collect_timer = timer(Instant::now(), self.config.interval);
        let sweep_every = self.config.sweep_interval;
        let mut sweep_timer = timer(Instant::now() + sweep_every, sweep_every);
        let mut poll_timer = timer(Instant::now(), self.config.command_poll);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Agent shutting down");
                    break;
                }
                _ = collect_timer.tick() => self.tick_collect().await,
                _ = sweep_timer.tick() => {
                    if sweep_task.is_finished() {
                        sweep_task = self.spawn_sweep();
                    } else {
                        debug!("Previous sweep still running, skipping");
                    }
                }
                _ = poll_timer.tick() => self.tick_poll().await,
            }
        }

        // Records mid-delivery stay on disk and are replayed next run
        sweep_task.abort();
    }

    async fn tick_collect(&self) {
        match self.run_cycle().await {
            Ok(SubmitOutcome::Delivered { snapshot_id }) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                debug!("Snapshot delivered (id {:?})", snapshot_id);
            }
            Ok(SubmitOutcome::Queued { path }) => {
                self.record_failure(format!("stored offline at {}", path.display()));
            }
            Ok(SubmitOutcome::Discarded { reason }) => {
                self.record_failure(format!("rejected by server: {}", reason));
            }
            Err(e) => self.record_failure(e),
        }
    }

    async fn tick_poll(&self) {
        match self.poll_commands().await {
            Ok(0) => {}
            Ok(n) => debug!("Handled {} commands", n),
            Err(e) => warn!("Command poll failed: {}", e),
        }
    }

    fn spawn_sweep(&self) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            match client.sweep().await {
                Ok(report) if report.scanned > 0 => debug!("Sweep finished: {}", report),
                Ok(_) => {}
                Err(e) => error!("Sweep failed: {}", e),
            }
        })
    }

    fn record_failure(&self, reason: impl Display) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
        let max_failures = self.config.max_failures as u64;

        if failures >= max_failures {
            error!("Collection failed {} consecutive times: {}", failures, reason);
        } else {
            warn!("Collection failed ({}/{}): {}", failures, max_failures, reason);
        }
    }

    /// Get agent statistics
    pub fn stats(&self) -> AgentStats {
        AgentStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            failed_cycles: self.failed_cycles.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
        }
    }
}

/// Delay-mode interval; periods below 1ms are raised to 1ms (tokio panics on zero)
fn timer(start: Instant, period: Duration) -> Interval {
    let mut timer = interval_at(start, period.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

fn log_command(command: &DeviceCommand) {
    match command.command_type {
        CommandType::RestartApp => match command.restart_params() {
            Some(params) => info!(
                "Restart of {} requested (force: {})",
                params.app_name, params.force
            ),
            None => warn!("restart_app command {} has invalid params", command.command_id),
        },
    }
}
