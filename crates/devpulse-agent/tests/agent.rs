//! Agent loop against mock API and quote endpoints

use devpulse_agent::{Agent, AgentConfig, CryptoCollector};
use devpulse_core::{DeviceCommand, DeviceRegistration, Snapshot};
use devpulse_sdk::{ClientConfig, MetricsClient, SubmitOutcome};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn agent_config(name: &str) -> AgentConfig {
    AgentConfig {
        interval: Duration::from_millis(50),
        sweep_interval: Duration::from_secs(3600),
        command_poll: Duration::from_millis(50),
        max_failures: 3,
        registration: DeviceRegistration::new(name, "desktop"),
    }
}

fn client(base_url: &str, dir: &TempDir) -> Arc<MetricsClient> {
    let config = ClientConfig::new(base_url, dir.path())
        .with_retries(1, Duration::from_millis(1))
        .with_request_timeout(Duration::from_secs(2));
    Arc::new(MetricsClient::new(config).unwrap())
}

fn command_json(status: &str) -> Value {
    let mut command = json!({
        "command_id": 3,
        "device_id": 7,
        "command_type": "restart_app",
        "params": {"app_name": "Safari", "force": false},
        "status": status,
        "created_at": "2024-01-01T00:00:00Z",
    });
    if status == "acknowledged" {
        command["acknowledged_at"] = json!("2024-01-01T00:01:00Z");
    }
    command
}

async fn mount_api(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "message": "Device registered successfully",
            "device_id": 7,
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/metrics"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "message": "Metrics uploaded successfully",
            "snapshot_id": 1,
        })))
        .mount(server)
        .await;
}

fn requests_to(requests: &[wiremock::Request], url_path: &str) -> usize {
    requests.iter().filter(|r| r.url.path() == url_path).count()
}

#[tokio::test]
async fn test_run_registers_submits_and_handles_commands() {
    let server = MockServer::start().await;
    mount_api(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/7/commands"))
        .and(query_param("status", "pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([command_json("pending")])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices/7/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/devices/7/commands/3/ack"))
        .respond_with(ResponseTemplate::new(200).set_body_json(command_json("acknowledged")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let handled = Arc::new(Mutex::new(Vec::new()));
    let sink = handled.clone();
    let agent = Agent::new(client(&server.uri(), &dir), agent_config("laptop"))
        .with_command_handler(Arc::new(move |command: &DeviceCommand| {
            let params = command.restart_params().unwrap();
            sink.lock().unwrap().push(params.app_name);
        }));

    agent.run(tokio::time::sleep(Duration::from_millis(400))).await;

    assert_eq!(agent.client().device_id(), Some(7));
    assert_eq!(*handled.lock().unwrap(), vec!["Safari".to_string()]);

    let stats = agent.stats();
    assert!(stats.cycles >= 1);
    assert_eq!(stats.failed_cycles, 0);
    assert_eq!(stats.commands_handled, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_to(&requests, "/v1/devices"), 1);
    assert!(requests_to(&requests, "/v1/metrics") >= 1);

    let body: Value = requests
        .iter()
        .find(|r| r.url.path() == "/v1/metrics")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    assert_eq!(body["device_id"], 7);
    assert!(body["system_metrics"]["thread_count"].as_u64().unwrap() >= 1);
    assert!(body.get("crypto_metrics").is_none());
}

#[tokio::test]
async fn test_run_survives_unreachable_server() {
    let dir = TempDir::new().unwrap();
    let client = client("http://127.0.0.1:9", &dir);
    client.set_device_id(1);
    let agent = Agent::new(client, agent_config("offline-box"));

    agent.run(tokio::time::sleep(Duration::from_millis(300))).await;

    let stats = agent.stats();
    assert!(stats.cycles >= 1);
    assert_eq!(stats.failed_cycles, stats.cycles);
    assert_eq!(stats.consecutive_failures, stats.cycles);
    assert_eq!(
        agent.client().store().pending_count().unwrap() as u64,
        stats.cycles
    );
}

#[tokio::test]
async fn test_backlog_sweep_does_not_hold_up_collection() {
    let dir = TempDir::new().unwrap();
    let config = ClientConfig::new("http://127.0.0.1:9", dir.path())
        .with_retries(3, Duration::from_millis(50))
        .with_request_timeout(Duration::from_secs(2));
    let client = Arc::new(MetricsClient::new(config).unwrap());
    client.set_device_id(1);
    for _ in 0..20 {
        client.store().persist(&Snapshot::now(1)).unwrap();
    }

    let mut config = agent_config("offline-box");
    config.interval = Duration::from_millis(100);
    let agent = Agent::new(client, config);

    agent.run(tokio::time::sleep(Duration::from_secs(2))).await;

    let cycles = agent.stats().cycles;
    assert!(cycles >= 5, "only {} cycles ran", cycles);
    assert_eq!(
        agent.client().store().pending_count().unwrap() as u64,
        20 + cycles
    );
}

#[tokio::test]
async fn test_cycle_attaches_crypto_quotes() {
    let server = MockServer::start().await;
    mount_api(&server).await;

    let quotes = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bitcoin": {"usd": 42000.0},
            "ethereum": {"usd": 2500.0},
        })))
        .mount(&quotes)
        .await;

    let dir = TempDir::new().unwrap();
    let crypto = CryptoCollector::new(&quotes.uri(), Duration::from_secs(2)).unwrap();
    let agent = Agent::new(client(&server.uri(), &dir), agent_config("laptop")).with_crypto(crypto);

    let outcome = agent.run_cycle().await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Delivered { snapshot_id: Some(1) });

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests
        .iter()
        .find(|r| r.url.path() == "/v1/metrics")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    assert_eq!(body["crypto_metrics"]["bitcoin_price_usd"], 42000.0);
    assert_eq!(body["crypto_metrics"]["ethereum_price_usd"], 2500.0);
}

#[tokio::test]
async fn test_cycle_without_quotes_still_submits() {
    let server = MockServer::start().await;
    mount_api(&server).await;

    let quotes = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/simple/price"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&quotes)
        .await;

    let dir = TempDir::new().unwrap();
    let crypto = CryptoCollector::new(&quotes.uri(), Duration::from_secs(2)).unwrap();
    let agent = Agent::new(client(&server.uri(), &dir), agent_config("laptop")).with_crypto(crypto);

    let outcome = agent.run_cycle().await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Delivered { .. }));

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests
        .iter()
        .find(|r| r.url.path() == "/v1/metrics")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    assert_eq!(body["crypto_metrics"], json!({}));
}

#[tokio::test]
async fn test_registration_conflict_reuses_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/devices"))
        .and(body_partial_json(json!({"name": "laptop"})))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "Device already registered",
            "device_id": 12,
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let agent = Agent::new(client(&server.uri(), &dir), agent_config("laptop"));

    assert_eq!(agent.ensure_registered().await.unwrap(), 12);
    assert_eq!(agent.client().device_id(), Some(12));

    // Already known; no second registration
    assert_eq!(agent.ensure_registered().await.unwrap(), 12);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_poll_commands_before_registration_is_noop() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let agent = Agent::new(client(&server.uri(), &dir), agent_config("laptop"));

    assert_eq!(agent.poll_commands().await.unwrap(), 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}
