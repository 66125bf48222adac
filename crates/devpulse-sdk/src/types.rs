//! Response bodies returned by the devpulse API

use serde::{Deserialize, Serialize};

/// Body of a 201 response to `POST /v1/metrics`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestReceipt {
    pub message: String,
    pub snapshot_id: i64,
}

/// Error body returned with any non-success status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,

    /// Existing device id, sent with a 409 on registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,
}

impl ApiErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            device_id: None,
        }
    }
}

/// Body of `GET /api/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_rejects_unknown_fields() {
        let ok: IngestReceipt =
            serde_json::from_str(r#"{"message":"Metrics uploaded successfully","snapshot_id":3}"#)
                .unwrap();
        assert_eq!(ok.snapshot_id, 3);

        let extra = r#"{"message":"ok","snapshot_id":3,"other":1}"#;
        assert!(serde_json::from_str::<IngestReceipt>(extra).is_err());
    }

    #[test]
    fn test_error_body_optional_device_id() {
        let body: ApiErrorBody = serde_json::from_str(r#"{"error":"Device not found"}"#).unwrap();
        assert_eq!(body.device_id, None);

        let body: ApiErrorBody =
            serde_json::from_str(r#"{"error":"Device already registered","device_id":5}"#)
                .unwrap();
        assert_eq!(body.device_id, Some(5));
    }
}
