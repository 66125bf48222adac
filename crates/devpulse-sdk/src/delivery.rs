//! Delivery engine
//!
//! Sends one snapshot with bounded retries and linear backoff, then reports
//! how delivery ended. The engine never touches disk; callers decide what to
//! do with a transient failure.

use crate::error::{SdkError, SdkResult};
use async_trait::async_trait;
use devpulse_core::Snapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Network path used by the engine
#[async_trait]
pub trait SnapshotTransport: Send + Sync {
    /// Send one snapshot, returning the server-assigned id when known
    async fn send(&self, snapshot: &Snapshot) -> SdkResult<Option<i64>>;
}

/// Attempt count and base delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts; zero is treated as one
    pub max_retries: u32,

    /// Attempt `n` is followed by a sleep of `n * retry_delay`
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Number of attempts actually made
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Sleep after the given 1-based attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

/// How a delivery ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The server accepted the snapshot
    Success { snapshot_id: Option<i64> },

    /// The server rejected the snapshot as invalid; retrying cannot help
    PermanentFailure { reason: String },

    /// Every attempt failed with a transient error
    ///
    /// `unreachable` is set when the last attempt never got a response.
    TransientFailureExhausted {
        attempts: u32,
        last_error: String,
        unreachable: bool,
    },
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Success { .. })
    }
}

/// Sends snapshots through a transport with retry
#[derive(Clone)]
pub struct DeliveryEngine {
    transport: Arc<dyn SnapshotTransport>,
    policy: RetryPolicy,
}

impl DeliveryEngine {
    pub fn new(transport: Arc<dyn SnapshotTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Try to deliver one snapshot
    pub async fn attempt_delivery(&self, snapshot: &Snapshot) -> DeliveryResult {
        let attempts = self.policy.attempts();
        let mut last_error = String::new();
        let mut unreachable = false;

        for attempt in 1..=attempts {
            match self.transport.send(snapshot).await {
                Ok(snapshot_id) => {
                    debug!(
                        "Snapshot for device {} delivered on attempt {} (id {:?})",
                        snapshot.device_id(),
                        attempt,
                        snapshot_id
                    );
                    return DeliveryResult::Success { snapshot_id };
                }
                Err(e) if is_permanent(&e) => {
                    let reason = match e {
                        SdkError::Rejected { message, .. } => message,
                        other => other.to_string(),
                    };
                    error!(
                        "Snapshot for device {} rejected: {}",
                        snapshot.device_id(),
                        reason
                    );
                    return DeliveryResult::PermanentFailure { reason };
                }
                Err(e) => {
                    warn!("Delivery attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e.to_string();
                    unreachable = e.is_network_error();
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        DeliveryResult::TransientFailureExhausted {
            attempts,
            last_error,
            unreachable,
        }
    }
}

/// Only a 400 response or an unserializable snapshot ends delivery early
fn is_permanent(err: &SdkError) -> bool {
    matches!(err, SdkError::Rejected { .. } | SdkError::Serialization(_))
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;
    use devpulse_core::SystemMetrics;
    use tokio::time::Instant;

    fn snapshot() -> Snapshot {
        Snapshot::now(1).with_system_metrics(SystemMetrics::new(10, 75.5).unwrap())
    }

    fn engine(transport: Arc<ScriptedTransport>, retries: u32) -> DeliveryEngine {
        DeliveryEngine::new(transport, RetryPolicy::new(retries, Duration::from_secs(1)))
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_zero_retries_means_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let transport = Arc::new(ScriptedTransport::always_ok());
        let start = Instant::now();

        let result = engine(transport.clone(), 3).attempt_delivery(&snapshot()).await;

        assert_eq!(result, DeliveryResult::Success { snapshot_id: Some(1) });
        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::always_rejected());
        let start = Instant::now();

        let result = engine(transport.clone(), 3).attempt_delivery(&snapshot()).await;

        assert_eq!(
            result,
            DeliveryResult::PermanentFailure {
                reason: "Missing device_id".to_string()
            }
        );
        assert_eq!(transport.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_waits_linear_backoff() {
        let transport = Arc::new(ScriptedTransport::always_unavailable());
        let start = Instant::now();

        let result = engine(transport.clone(), 3).attempt_delivery(&snapshot()).await;

        match result {
            DeliveryResult::TransientFailureExhausted {
                attempts,
                last_error,
                unreachable,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
                assert!(!unreachable);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
        // 1s after attempt 1, 2s after attempt 2, nothing after the last
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Err(SdkError::Timeout), Err(SdkError::server(404, "Device not found"))],
            || Ok(Some(77)),
        ));

        let result = engine(transport.clone(), 3).attempt_delivery(&snapshot()).await;

        assert_eq!(result, DeliveryResult::Success { snapshot_id: Some(77) });
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_flags_unreachable_endpoint() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![Err(SdkError::server(503, "unavailable"))],
            || Err(SdkError::Timeout),
        ));

        let result = engine(transport, 2).attempt_delivery(&snapshot()).await;

        assert!(matches!(
            result,
            DeliveryResult::TransientFailureExhausted {
                attempts: 2,
                unreachable: true,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_receipt_is_still_success() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new(), || Ok(None)));
        let result = engine(transport, 3).attempt_delivery(&snapshot()).await;
        assert_eq!(result, DeliveryResult::Success { snapshot_id: None });
    }
}
