//! Snapshot retrieval filters and summaries

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Page size used when a query does not set `limit`
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

fn default_limit() -> u32 {
    DEFAULT_QUERY_LIMIT
}

/// Filters for `GET /v1/metrics`
///
/// Bounds are inclusive. Results come back newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,

    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for SnapshotQuery {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            device_id: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl SnapshotQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device_id: i64) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn since(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn until(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Reject an inverted time range
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start > end => Err(ValidationError::InvalidTimeRange),
            _ => Ok(()),
        }
    }

    /// True when `timestamp` falls inside the inclusive bounds
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start_time.map_or(true, |start| timestamp >= start)
            && self.end_time.map_or(true, |end| timestamp <= end)
    }
}

/// Filters for `GET /v1/snapshots`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<i64>,

    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for SummaryQuery {
    fn default() -> Self {
        Self {
            device_id: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

/// Lightweight listing entry for a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotSummary {
    pub snapshot_id: i64,
    pub device_id: i64,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub has_system_metrics: bool,
    pub has_crypto_metrics: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_limit() {
        assert_eq!(SnapshotQuery::default().limit, 100);
        let q: SnapshotQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.limit, 100);
        assert!(q.device_id.is_none());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let q = SnapshotQuery::new().since(start).until(end);
        assert_eq!(q.validate(), Err(ValidationError::InvalidTimeRange));
        assert!(SnapshotQuery::new().since(end).until(start).validate().is_ok());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let q = SnapshotQuery::new().since(start).until(end);
        assert!(q.contains(start));
        assert!(q.contains(end));
        assert!(!q.contains(end + chrono::Duration::nanoseconds(1)));
        assert!(SnapshotQuery::new().contains(end));
    }

    #[test]
    fn test_unset_filters_are_not_serialized() {
        let value = serde_json::to_value(SnapshotQuery::new().device(4)).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["device_id"], 4);
        assert_eq!(obj["limit"], 100);
    }
}
