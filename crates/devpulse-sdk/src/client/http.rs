//! HTTP client for the devpulse REST API
//!
//! Handles all REST calls; the delivery engine reaches it through
//! [`SnapshotTransport`].

use crate::delivery::SnapshotTransport;
use crate::error::{SdkError, SdkResult};
use crate::types::{ApiErrorBody, HealthStatus, IngestReceipt};
use async_trait::async_trait;
use devpulse_core::{
    CommandRequest, CommandStatus, DeviceCommand, DeviceRegistered, DeviceRegistration, Snapshot,
    SnapshotQuery, SnapshotSummary, SummaryQuery,
};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// HTTP client for the devpulse API
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> SdkResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("devpulse-sdk/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST one snapshot to `/v1/metrics`
    ///
    /// Returns the server-assigned id, or `None` when a success response
    /// carried a body that could not be read.
    pub async fn post_snapshot(&self, snapshot: &Snapshot) -> SdkResult<Option<i64>> {
        let url = format!("{}/v1/metrics", self.base_url);
        let body = serde_json::to_vec(snapshot)?;

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            return match response.json::<IngestReceipt>().await {
                Ok(receipt) => Ok(Some(receipt.snapshot_id)),
                Err(e) => {
                    warn!("Snapshot accepted but response body was unreadable: {}", e);
                    Ok(None)
                }
            };
        }

        Err(self.error_for(status, response).await)
    }

    /// Fetch snapshots matching a query, newest first
    pub async fn fetch_snapshots(&self, query: &SnapshotQuery) -> SdkResult<Vec<Snapshot>> {
        let url = format!("{}/v1/metrics", self.base_url);
        debug!("Fetching snapshots: {:?}", query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(send_error)?;

        self.handle_response(response).await
    }

    /// Fetch snapshot summaries, newest first
    pub async fn snapshot_summaries(
        &self,
        query: &SummaryQuery,
    ) -> SdkResult<Vec<SnapshotSummary>> {
        let url = format!("{}/v1/snapshots", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(send_error)?;

        self.handle_response(response).await
    }

    /// Register a device
    pub async fn register_device(
        &self,
        registration: &DeviceRegistration,
    ) -> SdkResult<DeviceRegistered> {
        let url = format!("{}/v1/devices", self.base_url);

        debug!("Registering device {}", registration.name);

        let response = self
            .client
            .post(&url)
            .json(registration)
            .send()
            .await
            .map_err(send_error)?;

        self.handle_response(response).await
    }

    /// Queue a command for a device
    pub async fn send_command(
        &self,
        device_id: i64,
        request: &CommandRequest,
    ) -> SdkResult<DeviceCommand> {
        let url = format!("{}/v1/devices/{}/commands", self.base_url, device_id);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        self.handle_response(response).await
    }

    /// List commands for a device, optionally filtered by status
    pub async fn list_commands(
        &self,
        device_id: i64,
        status: Option<CommandStatus>,
    ) -> SdkResult<Vec<DeviceCommand>> {
        let url = format!("{}/v1/devices/{}/commands", self.base_url, device_id);

        let mut request = self.client.get(&url);
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }

        let response = request.send().await.map_err(send_error)?;
        self.handle_response(response).await
    }

    /// Mark a command as acknowledged
    pub async fn acknowledge_command(
        &self,
        device_id: i64,
        command_id: i64,
    ) -> SdkResult<DeviceCommand> {
        let url = format!(
            "{}/v1/devices/{}/commands/{}/ack",
            self.base_url, device_id, command_id
        );

        let response = self.client.post(&url).send().await.map_err(send_error)?;
        self.handle_response(response).await
    }

    /// Check server health
    pub async fn health(&self) -> SdkResult<HealthStatus> {
        let url = format!("{}/api/health", self.base_url);
        let response = self.client.get(&url).send().await.map_err(send_error)?;
        self.handle_response(response).await
    }

    /// Generic response handler
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> SdkResult<T> {
        let status = response.status();

        if status.is_success() {
            let bytes = response.bytes().await.map_err(send_error)?;
            return serde_json::from_slice(&bytes).map_err(|e| SdkError::Decode(e.to_string()));
        }

        Err(self.error_for(status, response).await)
    }

    /// Map a non-success response to an error
    async fn error_for(&self, status: StatusCode, response: reqwest::Response) -> SdkError {
        let body = self.parse_error(response).await;

        match status {
            StatusCode::BAD_REQUEST => SdkError::Rejected {
                status: status.as_u16(),
                message: body.error,
            },
            StatusCode::CONFLICT => SdkError::Conflict {
                message: body.error,
                device_id: body.device_id,
            },
            _ if status.is_server_error() => {
                error!("Server error {}: {}", status, body.error);
                SdkError::server(status.as_u16(), body.error)
            }
            _ => SdkError::server(status.as_u16(), body.error),
        }
    }

    async fn parse_error(&self, response: reqwest::Response) -> ApiErrorBody {
        response
            .json::<ApiErrorBody>()
            .await
            .unwrap_or_else(|_| ApiErrorBody::new("Unknown error"))
    }
}

#[async_trait]
impl SnapshotTransport for HttpClient {
    async fn send(&self, snapshot: &Snapshot) -> SdkResult<Option<i64>> {
        self.post_snapshot(snapshot).await
    }
}

fn send_error(e: reqwest::Error) -> SdkError {
    if e.is_timeout() {
        SdkError::Timeout
    } else {
        SdkError::Network(e)
    }
}
