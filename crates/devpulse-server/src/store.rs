//! SQLite storage for devices, snapshots and commands
//!
//! Timestamps are stored as UTC nanoseconds so stored snapshots read back
//! with the precision they were sent with.

use chrono::{DateTime, TimeZone, Utc};
use devpulse_core::{
    CommandRequest, CommandStatus, CryptoMetrics, DeviceCommand, DeviceRegistration, Snapshot,
    SnapshotQuery, SnapshotSummary, SummaryQuery, SystemMetrics,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    device_type TEXT NOT NULL,
    created_at_ns INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    timestamp_ns INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_device_time
    ON snapshots(device_id, timestamp_ns);

CREATE TABLE IF NOT EXISTS system_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL UNIQUE REFERENCES snapshots(id),
    thread_count INTEGER NOT NULL,
    ram_usage_percent REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS crypto_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    snapshot_id INTEGER NOT NULL UNIQUE REFERENCES snapshots(id),
    bitcoin_price_usd REAL,
    ethereum_price_usd REAL
);

CREATE TABLE IF NOT EXISTS commands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id),
    command_type TEXT NOT NULL,
    params TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at_ns INTEGER NOT NULL,
    acknowledged_at_ns INTEGER
);

CREATE INDEX IF NOT EXISTS idx_commands_device_status
    ON commands(device_id, status);
";

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timestamp out of storable range: {0}")]
    TimestampOutOfRange(DateTime<Utc>),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created(i64),
    AlreadyExists(i64),
}

/// SQLite-backed metrics store
#[derive(Clone)]
pub struct MetricsStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetricsStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!("Metrics database opened at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register a device by unique name
    pub fn register_device(&self, registration: &DeviceRegistration) -> StoreResult<Registration> {
        let conn = self.conn.lock();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM devices WHERE name = ?1",
                params![registration.name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(Registration::AlreadyExists(id));
        }

        conn.execute(
            "INSERT INTO devices (name, device_type, created_at_ns) VALUES (?1, ?2, ?3)",
            params![
                registration.name,
                registration.device_type,
                to_nanos(Utc::now())?
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Registered device {} as {}", registration.name, id);
        Ok(Registration::Created(id))
    }

    /// Check whether a device id is registered
    pub fn device_exists(&self, device_id: i64) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM devices WHERE id = ?1",
                params![device_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Store a snapshot with its metric groups and return its id
    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> StoreResult<i64> {
        let timestamp_ns = to_nanos(snapshot.timestamp())?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO snapshots (device_id, timestamp_ns) VALUES (?1, ?2)",
            params![snapshot.device_id(), timestamp_ns],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        if let Some(system) = snapshot.system_metrics() {
            tx.execute(
                "INSERT INTO system_metrics (snapshot_id, thread_count, ram_usage_percent)
                 VALUES (?1, ?2, ?3)",
                params![snapshot_id, system.thread_count, system.ram_usage_percent],
            )?;
        }

        if let Some(crypto) = snapshot.crypto_metrics() {
            tx.execute(
                "INSERT INTO crypto_metrics (snapshot_id, bitcoin_price_usd, ethereum_price_usd)
                 VALUES (?1, ?2, ?3)",
                params![
                    snapshot_id,
                    crypto.bitcoin_price_usd,
                    crypto.ethereum_price_usd
                ],
            )?;
        }

        tx.commit()?;
        Ok(snapshot_id)
    }

    /// Snapshots matching the query, newest first
    pub fn query_snapshots(&self, query: &SnapshotQuery) -> StoreResult<Vec<Snapshot>> {
        let start_ns = query.start_time.map(to_nanos).transpose()?;
        let end_ns = query.end_time.map(to_nanos).transpose()?;

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.device_id, s.timestamp_ns,
                    sm.id, sm.thread_count, sm.ram_usage_percent,
                    cm.id, cm.bitcoin_price_usd, cm.ethereum_price_usd
             FROM snapshots s
             LEFT JOIN system_metrics sm ON sm.snapshot_id = s.id
             LEFT JOIN crypto_metrics cm ON cm.snapshot_id = s.id
             WHERE (?1 IS NULL OR s.device_id = ?1)
               AND (?2 IS NULL OR s.timestamp_ns >= ?2)
               AND (?3 IS NULL OR s.timestamp_ns <= ?3)
             ORDER BY s.timestamp_ns DESC, s.id DESC
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![query.device_id, start_ns, end_ns, query.limit],
            snapshot_from_row,
        )?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    /// Snapshot listing with device names, newest first
    pub fn snapshot_summaries(&self, query: &SummaryQuery) -> StoreResult<Vec<SnapshotSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.device_id, d.name, s.timestamp_ns,
                    EXISTS(SELECT 1 FROM system_metrics sm WHERE sm.snapshot_id = s.id),
                    EXISTS(SELECT 1 FROM crypto_metrics cm WHERE cm.snapshot_id = s.id)
             FROM snapshots s
             JOIN devices d ON d.id = s.device_id
             WHERE (?1 IS NULL OR s.device_id = ?1)
             ORDER BY s.timestamp_ns DESC, s.id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![query.device_id, query.limit], |row| {
            Ok(SnapshotSummary {
                snapshot_id: row.get(0)?,
                device_id: row.get(1)?,
                device_name: row.get(2)?,
                timestamp: Utc.timestamp_nanos(row.get(3)?),
                has_system_metrics: row.get(4)?,
                has_crypto_metrics: row.get(5)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Queue a command for a device
    pub fn insert_command(
        &self,
        device_id: i64,
        request: &CommandRequest,
    ) -> StoreResult<DeviceCommand> {
        let created_at = Utc::now();
        let params_json = serde_json::to_string(&request.params)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO commands (device_id, command_type, params, status, created_at_ns)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device_id,
                request.command_type.as_str(),
                params_json,
                CommandStatus::Pending.as_str(),
                to_nanos(created_at)?
            ],
        )?;
        let command_id = conn.last_insert_rowid();

        info!(
            "Queued {} command {} for device {}",
            request.command_type, command_id, device_id
        );

        Ok(DeviceCommand {
            command_id,
            device_id,
            command_type: request.command_type,
            params: request.params.clone(),
            status: CommandStatus::Pending,
            created_at,
            acknowledged_at: None,
        })
    }

    /// Commands for a device, oldest first
    pub fn list_commands(
        &self,
        device_id: i64,
        status: Option<CommandStatus>,
    ) -> StoreResult<Vec<DeviceCommand>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, device_id, command_type, params, status, created_at_ns, acknowledged_at_ns
             FROM commands
             WHERE device_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(
            params![device_id, status.map(|s| s.as_str())],
            raw_command_from_row,
        )?;

        let mut commands = Vec::new();
        for row in rows {
            commands.push(row?.into_command()?);
        }
        Ok(commands)
    }

    /// Mark a command acknowledged; `None` if it does not exist for the device
    pub fn acknowledge_command(
        &self,
        device_id: i64,
        command_id: i64,
    ) -> StoreResult<Option<DeviceCommand>> {
        let conn = self.conn.lock();

        // Keep the first acknowledgement time
        conn.execute(
            "UPDATE commands SET status = ?1, acknowledged_at_ns = COALESCE(acknowledged_at_ns, ?2)
             WHERE id = ?3 AND device_id = ?4",
            params![
                CommandStatus::Acknowledged.as_str(),
                to_nanos(Utc::now())?,
                command_id,
                device_id
            ],
        )?;

        let raw = conn
            .query_row(
                "SELECT id, device_id, command_type, params, status, created_at_ns, acknowledged_at_ns
                 FROM commands WHERE id = ?1 AND device_id = ?2",
                params![command_id, device_id],
                raw_command_from_row,
            )
            .optional()?;

        raw.map(RawCommand::into_command).transpose()
    }

    /// Total stored snapshots
    pub fn snapshot_count(&self) -> StoreResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?)
    }
}

fn to_nanos(timestamp: DateTime<Utc>) -> StoreResult<i64> {
    timestamp
        .timestamp_nanos_opt()
        .ok_or(StoreError::TimestampOutOfRange(timestamp))
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let snapshot_id: i64 = row.get(0)?;
    let device_id: i64 = row.get(1)?;
    let timestamp_ns: i64 = row.get(2)?;

    let mut snapshot =
        Snapshot::new(device_id, Utc.timestamp_nanos(timestamp_ns)).with_snapshot_id(snapshot_id);

    if row.get::<_, Option<i64>>(3)?.is_some() {
        snapshot = snapshot.with_system_metrics(SystemMetrics {
            thread_count: row.get(4)?,
            ram_usage_percent: row.get(5)?,
        });
    }

    if row.get::<_, Option<i64>>(6)?.is_some() {
        snapshot = snapshot.with_crypto_metrics(CryptoMetrics {
            bitcoin_price_usd: row.get(7)?,
            ethereum_price_usd: row.get(8)?,
        });
    }

    Ok(snapshot)
}

/// Command row before its text columns are parsed
struct RawCommand {
    command_id: i64,
    device_id: i64,
    command_type: String,
    params: String,
    status: String,
    created_at_ns: i64,
    acknowledged_at_ns: Option<i64>,
}

impl RawCommand {
    fn into_command(self) -> StoreResult<DeviceCommand> {
        Ok(DeviceCommand {
            command_id: self.command_id,
            device_id: self.device_id,
            command_type: self
                .command_type
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("command {}: {}", self.command_id, e)))?,
            params: serde_json::from_str(&self.params)?,
            status: self
                .status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("command {}: {}", self.command_id, e)))?,
            created_at: Utc.timestamp_nanos(self.created_at_ns),
            acknowledged_at: self.acknowledged_at_ns.map(|ns| Utc.timestamp_nanos(ns)),
        })
    }
}

fn raw_command_from_row(row: &Row<'_>) -> rusqlite::Result<RawCommand> {
    Ok(RawCommand {
        command_id: row.get(0)?,
        device_id: row.get(1)?,
        command_type: row.get(2)?,
        params: row.get(3)?,
        status: row.get(4)?,
        created_at_ns: row.get(5)?,
        acknowledged_at_ns: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with_device() -> (MetricsStore, i64) {
        let store = MetricsStore::in_memory().unwrap();
        let id = match store
            .register_device(&DeviceRegistration::new("laptop", "desktop"))
            .unwrap()
        {
            Registration::Created(id) => id,
            other => panic!("unexpected {:?}", other),
        };
        (store, id)
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_register_device_twice() {
        let (store, id) = store_with_device();
        let again = store
            .register_device(&DeviceRegistration::new("laptop", "server"))
            .unwrap();
        assert_eq!(again, Registration::AlreadyExists(id));
        assert!(store.device_exists(id).unwrap());
        assert!(!store.device_exists(id + 100).unwrap());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (store, id) = store_with_device();
        let timestamp = base_time() + Duration::nanoseconds(123_456_789);
        let snapshot = Snapshot::new(id, timestamp)
            .with_system_metrics(SystemMetrics::new(10, 75.5).unwrap())
            .with_crypto_metrics(CryptoMetrics::new(Some(42000.5), None).unwrap());

        let snapshot_id = store.insert_snapshot(&snapshot).unwrap();
        let stored = store.query_snapshots(&SnapshotQuery::new()).unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], snapshot.with_snapshot_id(snapshot_id));
    }

    #[test]
    fn test_absent_groups_stay_absent() {
        let (store, id) = store_with_device();
        store.insert_snapshot(&Snapshot::new(id, base_time())).unwrap();

        let stored = store.query_snapshots(&SnapshotQuery::new()).unwrap();
        assert!(stored[0].system_metrics().is_none());
        assert!(stored[0].crypto_metrics().is_none());

        let summaries = store.snapshot_summaries(&SummaryQuery::default()).unwrap();
        assert_eq!(summaries[0].device_name, "laptop");
        assert!(!summaries[0].has_system_metrics);
        assert!(!summaries[0].has_crypto_metrics);
    }

    #[test]
    fn test_query_filters_and_order() {
        let (store, id) = store_with_device();
        let other = match store
            .register_device(&DeviceRegistration::new("server", "server"))
            .unwrap()
        {
            Registration::Created(id) => id,
            other => panic!("unexpected {:?}", other),
        };

        for minutes in 0..5 {
            store
                .insert_snapshot(&Snapshot::new(id, base_time() + Duration::minutes(minutes)))
                .unwrap();
        }
        store.insert_snapshot(&Snapshot::new(other, base_time())).unwrap();

        let all = store.query_snapshots(&SnapshotQuery::new()).unwrap();
        assert_eq!(all.len(), 6);

        let mine = store
            .query_snapshots(&SnapshotQuery::new().device(id))
            .unwrap();
        let times: Vec<_> = mine.iter().map(|s| s.timestamp()).collect();
        let mut sorted = times.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(times, sorted);
        assert_eq!(mine.len(), 5);

        let window = store
            .query_snapshots(
                &SnapshotQuery::new()
                    .device(id)
                    .since(base_time() + Duration::minutes(1))
                    .until(base_time() + Duration::minutes(3)),
            )
            .unwrap();
        assert_eq!(window.len(), 3);

        let limited = store
            .query_snapshots(&SnapshotQuery::new().limit(2))
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].timestamp(), base_time() + Duration::minutes(4));
    }

    #[test]
    fn test_command_lifecycle() {
        let (store, id) = store_with_device();
        let command = store
            .insert_command(id, &CommandRequest::restart_app("Safari", false))
            .unwrap();
        assert_eq!(command.status, CommandStatus::Pending);

        let pending = store
            .list_commands(id, Some(CommandStatus::Pending))
            .unwrap();
        assert_eq!(pending, vec![command.clone()]);

        let acked = store
            .acknowledge_command(id, command.command_id)
            .unwrap()
            .unwrap();
        assert_eq!(acked.status, CommandStatus::Acknowledged);
        assert!(acked.acknowledged_at.is_some());

        assert!(store
            .list_commands(id, Some(CommandStatus::Pending))
            .unwrap()
            .is_empty());
        assert_eq!(store.list_commands(id, None).unwrap().len(), 1);
    }

    #[test]
    fn test_acknowledge_unknown_command() {
        let (store, id) = store_with_device();
        assert!(store.acknowledge_command(id, 99).unwrap().is_none());

        let command = store
            .insert_command(id, &CommandRequest::restart_app("Mail", true))
            .unwrap();
        // Wrong device
        assert!(store
            .acknowledge_command(id + 1, command.command_id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data").join("metrics.db");
        {
            let store = MetricsStore::open(&path).unwrap();
            store
                .register_device(&DeviceRegistration::new("a", "b"))
                .unwrap();
        }
        let reopened = MetricsStore::open(&path).unwrap();
        assert_eq!(
            reopened
                .register_device(&DeviceRegistration::new("a", "b"))
                .unwrap(),
            Registration::AlreadyExists(1)
        );
    }
}
