//! API tests against a live server on an ephemeral port

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use devpulse_core::{
    CommandStatus, CryptoMetrics, DeviceRegistration, Snapshot, SnapshotQuery, SummaryQuery,
    SystemMetrics,
};
use devpulse_sdk::{ClientConfig, MetricsClient, SdkError, SubmitOutcome};
use devpulse_server::{serve, AppState, MetricsStore};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(MetricsStore::in_memory().unwrap());
    tokio::spawn(serve(listener, state, std::future::pending()));
    format!("http://{}", addr)
}

fn client(base_url: &str, dir: &TempDir) -> MetricsClient {
    let config = ClientConfig::new(base_url, dir.path())
        .with_retries(3, Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(5));
    MetricsClient::new(config).unwrap()
}

#[tokio::test]
async fn test_health() {
    let base = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let health = client(&base, &dir).health().await.unwrap();
    assert_eq!(health.status, "healthy");
}

#[tokio::test]
async fn test_register_and_conflict() {
    let base = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let client = client(&base, &dir);
    let registration = DeviceRegistration::new("laptop", "desktop");

    let id = client.register_device(&registration).await.unwrap();
    let err = client.register_device(&registration).await.unwrap_err();
    assert!(matches!(err, SdkError::Conflict { device_id: Some(d), .. } if d == id));
    assert_eq!(client.ensure_device(&registration).await.unwrap(), id);
}

#[tokio::test]
async fn test_register_missing_fields() {
    let base = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{}/v1/devices", base))
        .json(&json!({"name": "only-name"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Missing required fields"));
}

#[tokio::test]
async fn test_submit_then_query_round_trip() {
    let base = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let client = client(&base, &dir);
    let device_id = client
        .register_device(&DeviceRegistration::new("laptop", "desktop"))
        .await
        .unwrap();

    let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        + ChronoDuration::nanoseconds(987_654_321);
    let snapshot = Snapshot::new(device_id, timestamp)
        .with_system_metrics(SystemMetrics::new(10, 75.5).unwrap())
        .with_crypto_metrics(CryptoMetrics::new(Some(42000.0), None).unwrap());

    let outcome = client.submit(&snapshot).await.unwrap();
    let snapshot_id = match outcome {
        SubmitOutcome::Delivered {
            snapshot_id: Some(id),
        } => id,
        other => panic!("expected delivery, got {:?}", other),
    };

    let stored = client
        .fetch_snapshots(&SnapshotQuery::new().device(device_id))
        .await
        .unwrap();
    assert_eq!(stored, vec![snapshot.with_snapshot_id(snapshot_id)]);

    let summaries = client
        .snapshot_summaries(&SummaryQuery::default())
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].device_name, "laptop");
    assert!(summaries[0].has_system_metrics);
    assert!(summaries[0].has_crypto_metrics);
}

#[tokio::test]
async fn test_query_window_and_limit() {
    let base = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let client = client(&base, &dir);
    let device_id = client
        .register_device(&DeviceRegistration::new("laptop", "desktop"))
        .await
        .unwrap();

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    for minutes in 0..6 {
        let snapshot = Snapshot::new(device_id, start + ChronoDuration::minutes(minutes));
        assert!(client.submit(&snapshot).await.unwrap().is_accepted());
    }

    let window = client
        .fetch_snapshots(
            &SnapshotQuery::new()
                .since(start + ChronoDuration::minutes(2))
                .until(start + ChronoDuration::minutes(4)),
        )
        .await
        .unwrap();
    let minutes: Vec<i64> = window
        .iter()
        .map(|s| (s.timestamp() - start).num_minutes())
        .collect();
    assert_eq!(minutes, vec![4, 3, 2]);

    let limited = client
        .fetch_snapshots(&SnapshotQuery::new().limit(2))
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_unknown_device_is_retried_then_queued() {
    let base = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let client = client(&base, &dir);

    let outcome = client.submit(&Snapshot::now(999)).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
    assert_eq!(client.store().pending_count().unwrap(), 1);

    // Once the device exists the sweep delivers the backlog
    let id = client
        .register_device(&DeviceRegistration::new("late", "desktop"))
        .await
        .unwrap();
    assert_eq!(id, 1);
    client.store().persist(&Snapshot::now(id)).unwrap();
    let report = client.sweep().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.retained, 1);
}

#[tokio::test]
async fn test_invalid_metrics_rejected() {
    let base = spawn_server().await;
    let http = reqwest::Client::new();
    let dir = TempDir::new().unwrap();
    let device_id = client(&base, &dir)
        .register_device(&DeviceRegistration::new("laptop", "desktop"))
        .await
        .unwrap();

    let cases = [
        json!({"timestamp": "2024-01-01T00:00:00Z"}),
        json!({"device_id": device_id, "timestamp": "2024-01-01T00:00:00Z",
               "system_metrics": {"thread_count": 1, "ram_usage_percent": 180.0}}),
        json!({"device_id": device_id, "timestamp": "2024-01-01T00:00:00Z", "extra": true}),
    ];

    for body in cases {
        let response = http
            .post(format!("{}/v1/metrics", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "body: {}", body);
        let error: Value = response.json().await.unwrap();
        assert!(error["error"].is_string());
    }
}

#[tokio::test]
async fn test_rejected_snapshot_is_discarded_by_client() {
    let base = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let client = client(&base, &dir);
    let device_id = client
        .register_device(&DeviceRegistration::new("laptop", "desktop"))
        .await
        .unwrap();

    // Bypass the range check in SystemMetrics::new
    let snapshot = Snapshot::now(device_id).with_system_metrics(SystemMetrics {
        thread_count: 3,
        ram_usage_percent: 101.0,
    });

    let outcome = client.submit(&snapshot).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Discarded { .. }));
    assert_eq!(client.store().pending_count().unwrap(), 0);
}

#[tokio::test]
async fn test_command_flow() {
    let base = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let client = client(&base, &dir);
    let device_id = client
        .register_device(&DeviceRegistration::new("laptop", "desktop"))
        .await
        .unwrap();
    client.set_device_id(device_id);

    let command = client.restart_app("Safari", false).await.unwrap();
    assert_eq!(command.status, CommandStatus::Pending);

    let pending = client.pending_commands().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].restart_params().unwrap().app_name, "Safari");

    let acked = client
        .acknowledge_command(command.command_id)
        .await
        .unwrap();
    assert_eq!(acked.status, CommandStatus::Acknowledged);
    assert!(client.pending_commands().await.unwrap().is_empty());
    assert_eq!(client.list_commands(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_command_errors() {
    let base = spawn_server().await;
    let http = reqwest::Client::new();

    // Unknown device
    let response = http
        .post(format!("{}/v1/devices/42/commands", base))
        .json(&json!({"command_type": "restart_app", "params": {"app_name": "Mail"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Unknown command type
    let response = http
        .post(format!("{}/v1/devices/42/commands", base))
        .json(&json!({"command_type": "shutdown", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown command
    let response = http
        .post(format!("{}/v1/devices/42/commands/7/ack", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
