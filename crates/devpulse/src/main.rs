//! devpulse - device telemetry with store-and-forward delivery
//!
//! One binary for the collection agent, the API server, the terminal
//! dashboard, and one-off maintenance commands.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use devpulse_agent::Agent;
use devpulse_core::config::{AppConfig, ConfigLoader};
use devpulse_core::device::default_device_name;
use devpulse_core::{
    CommandRequest, CommandStatus, ConfigError, CryptoMetrics, DeviceRegistration, Snapshot,
    SnapshotQuery, SystemMetrics, DEFAULT_QUERY_LIMIT,
};
use devpulse_sdk::{ClientConfig, MetricsClient, SubmitOutcome};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "devpulse")]
#[command(version)]
#[command(about = "Device telemetry agent, API server and dashboard", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "DEVPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect and submit metrics on an interval
    Agent {
        /// Seconds between collections
        #[arg(long)]
        interval: Option<u64>,

        /// Skip crypto quotes
        #[arg(long)]
        no_crypto: bool,
    },

    /// Run the API server
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Port
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Open the terminal dashboard
    Dashboard,

    /// Submit a single snapshot
    Submit {
        /// Thread count
        #[arg(long)]
        threads: u32,

        /// RAM usage percent
        #[arg(long)]
        ram: f64,

        /// Bitcoin price in USD
        #[arg(long)]
        btc: Option<f64>,

        /// Ethereum price in USD
        #[arg(long)]
        eth: Option<f64>,

        /// Device id (defaults to the configured one)
        #[arg(short, long)]
        device: Option<i64>,
    },

    /// Replay the offline backlog once
    Sweep,

    /// Show the offline backlog
    Pending {
        /// Delete unreadable records older than this many hours
        #[arg(long, value_name = "HOURS")]
        purge_corrupt_older_than: Option<u64>,
    },

    /// Print stored snapshots as JSON, newest first
    Query {
        /// Only this device
        #[arg(short, long)]
        device: Option<i64>,

        /// Inclusive lower bound (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        start: Option<DateTime<Utc>>,

        /// Inclusive upper bound (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        end: Option<DateTime<Utc>>,

        /// Maximum snapshots to return
        #[arg(short, long, default_value_t = DEFAULT_QUERY_LIMIT)]
        limit: u32,
    },

    /// Register a device with the server
    Register {
        /// Device name (defaults to the host name)
        #[arg(short, long)]
        name: Option<String>,

        /// Device type
        #[arg(short = 't', long, default_value = "desktop")]
        device_type: String,
    },

    /// Queue a restart_app command
    RestartApp {
        /// Application to restart
        #[arg(short, long)]
        app: String,

        /// Force quit before restarting
        #[arg(long)]
        force: bool,

        /// Target device (defaults to the configured one)
        #[arg(short, long)]
        device: Option<i64>,
    },

    /// List commands for a device
    Commands {
        /// Filter by status (pending, acknowledged)
        #[arg(short, long)]
        status: Option<CommandStatus>,

        /// Target device (defaults to the configured one)
        #[arg(short, long)]
        device: Option<i64>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Print the configuration file in use
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::new().with_cli_path(cli.config.clone());
    let loaded = loader.load();

    // Setup logging - CLI verbose flag takes precedence, then config, then default
    let config_level = loaded.as_ref().map(|c| c.logging.level.as_str()).unwrap_or("warn");
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        parse_level(config_level)
    };

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| loaded.as_ref().ok().and_then(|c| c.logging.file.clone()));
    init_logging(log_level, log_file)?;

    let config = resolve_config(loaded);

    match cli.command {
        Commands::Agent {
            interval,
            no_crypto,
        } => {
            let mut config = config;
            if let Some(secs) = interval {
                config.agent.interval_secs = secs;
            }
            if no_crypto {
                config.agent.crypto_enabled = false;
            }
            agent_command(config).await
        }
        Commands::Serve {
            host,
            port,
            database,
        } => {
            let mut settings = config.server;
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(database) = database {
                settings.database_path = database;
            }
            devpulse_server::start_server(&settings).await
        }
        Commands::Dashboard => {
            let client = build_client(&config, None)?;
            devpulse_tui::run(&client, &config.dashboard).await
        }
        Commands::Submit {
            threads,
            ram,
            btc,
            eth,
            device,
        } => submit_command(&config, threads, ram, btc, eth, device).await,
        Commands::Sweep => sweep_command(&config).await,
        Commands::Pending {
            purge_corrupt_older_than,
        } => pending_command(&config, purge_corrupt_older_than),
        Commands::Query {
            device,
            start,
            end,
            limit,
        } => {
            let mut query = SnapshotQuery::new().limit(limit);
            query.device_id = device;
            query.start_time = start;
            query.end_time = end;
            query_command(&config, &query).await
        }
        Commands::Register { name, device_type } => {
            let name = name.unwrap_or_else(default_device_name);
            let client = build_client(&config, None)?;
            let device_id = client
                .register_device(&DeviceRegistration::new(name, device_type))
                .await?;
            println!("{}", device_id);
            Ok(())
        }
        Commands::RestartApp { app, force, device } => {
            let client = build_client(&config, device)?;
            let command = client.restart_app(&app, force).await?;
            println!("{}", serde_json::to_string_pretty(&command)?);
            Ok(())
        }
        Commands::Commands { status, device } => {
            let client = build_client(&config, device)?;
            let commands = client.list_commands(status).await?;
            println!("{}", serde_json::to_string_pretty(&commands)?);
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Path => {
                match loader.find_config_file() {
                    Some(path) => println!("{}", path.display()),
                    None => println!("none (using defaults)"),
                }
                Ok(())
            }
        },
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    }
}

fn init_logging(level: Level, log_file: Option<PathBuf>) -> anyhow::Result<()> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let subscriber = builder
                .with_ansi(false)
                .with_writer(io::stdout.and(Mutex::new(file)))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            tracing::subscriber::set_global_default(builder.finish())?;
        }
    }
    Ok(())
}

/// Use the loaded configuration, falling back to defaults
fn resolve_config(loaded: Result<AppConfig, ConfigError>) -> AppConfig {
    match loaded {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            warn!("Failed to load configuration: {}, using defaults", e);
            AppConfig::default()
        }
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

fn build_client(config: &AppConfig, device: Option<i64>) -> anyhow::Result<MetricsClient> {
    let device_id = device.or(config.agent.device_id);
    let client_config = ClientConfig::from_settings(&config.delivery, device_id);
    Ok(MetricsClient::new(client_config)?)
}

async fn agent_command(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting devpulse agent...");

    let client = Arc::new(build_client(&config, None)?);
    let agent = Agent::from_settings(client, &config.agent)?;

    println!();
    println!("  devpulse agent v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  API: {}", config.delivery.base_url);
    println!(
        "  Offline store: {}",
        config.delivery.offline_storage_path.display()
    );
    println!("  Interval: {}s", config.agent.interval_secs);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    agent
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    let stats = agent.client().stats();
    info!(
        "Agent stopped: {} delivered, {} queued, {} replayed, {} discarded",
        stats.delivered, stats.queued, stats.replayed, stats.discarded
    );
    Ok(())
}

async fn submit_command(
    config: &AppConfig,
    threads: u32,
    ram: f64,
    btc: Option<f64>,
    eth: Option<f64>,
    device: Option<i64>,
) -> anyhow::Result<()> {
    let client = build_client(config, device)?;
    let device_id = client
        .device_id()
        .context("no device id: pass --device or set agent.device_id")?;

    let mut snapshot =
        Snapshot::now(device_id).with_system_metrics(SystemMetrics::new(threads, ram)?);
    if btc.is_some() || eth.is_some() {
        snapshot = snapshot.with_crypto_metrics(CryptoMetrics::new(btc, eth)?);
    }

    match client.submit(&snapshot).await? {
        SubmitOutcome::Delivered { snapshot_id } => match snapshot_id {
            Some(id) => println!("Delivered (snapshot {})", id),
            None => println!("Delivered"),
        },
        SubmitOutcome::Queued { path } => {
            println!("Server unavailable, stored offline at {}", path.display())
        }
        SubmitOutcome::Discarded { reason } => {
            anyhow::bail!("Snapshot rejected by server: {}", reason)
        }
    }
    Ok(())
}

async fn sweep_command(config: &AppConfig) -> anyhow::Result<()> {
    let client = build_client(config, None)?;
    let report = client.sweep().await?;
    println!("{}", report);
    Ok(())
}

fn pending_command(config: &AppConfig, purge_corrupt_older_than: Option<u64>) -> anyhow::Result<()> {
    let client = build_client(config, None)?;
    let store = client.store();

    if let Some(hours) = purge_corrupt_older_than {
        let purged = store.purge_corrupt(Duration::from_secs(hours.saturating_mul(3600)))?;
        println!("Purged {} unreadable records", purged);
    }

    let stats = store.stats()?;
    println!(
        "{} pending ({} bytes) in {}",
        stats.pending,
        stats.bytes,
        store.root().display()
    );

    for entry in store.list_pending()? {
        match entry.load() {
            Ok(snapshot) => println!(
                "  {}  device {}  {}",
                entry.path().display(),
                snapshot.device_id(),
                snapshot.timestamp().to_rfc3339()
            ),
            Err(e) => println!("  {}  unreadable: {}", entry.path().display(), e),
        }
    }
    Ok(())
}

async fn query_command(config: &AppConfig, query: &SnapshotQuery) -> anyhow::Result<()> {
    query.validate()?;
    let client = build_client(config, None)?;
    let snapshots = client.fetch_snapshots(query).await?;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_time() {
        let parsed = parse_time("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("bogus"), Level::WARN);
    }

    #[test]
    fn test_parse_query_args() {
        let cli = Cli::parse_from([
            "devpulse",
            "query",
            "--device",
            "3",
            "--start",
            "2024-01-01T00:00:00Z",
            "--limit",
            "5",
        ]);
        match cli.command {
            Commands::Query {
                device,
                start,
                end,
                limit,
            } => {
                assert_eq!(device, Some(3));
                assert!(start.is_some());
                assert!(end.is_none());
                assert_eq!(limit, 5);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_parse_commands_status() {
        let cli = Cli::parse_from(["devpulse", "commands", "--status", "pending"]);
        assert!(matches!(
            cli.command,
            Commands::Commands {
                status: Some(CommandStatus::Pending),
                device: None
            }
        ));
    }
}
