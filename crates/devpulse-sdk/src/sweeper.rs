//! Recovery sweeper
//!
//! Replays stored records through the delivery engine. A record is removed
//! once the server accepts or rejects it; anything else keeps it for the next
//! sweep. A pass stops at the first record whose delivery never reached the
//! server.

use crate::delivery::{DeliveryEngine, DeliveryResult};
use crate::error::StorageResult;
use crate::offline_store::OfflineStore;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Outcome counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records found
    pub scanned: usize,

    /// Records accepted by the server and removed
    pub delivered: usize,

    /// Records rejected by the server and removed
    pub discarded: usize,

    /// Records kept after transient failures
    pub retained: usize,

    /// Records that could not be parsed (kept in place)
    pub corrupt: usize,

    /// The pass stopped early because the server was unreachable
    pub interrupted: bool,
}

impl SweepReport {
    /// Records removed by this sweep
    pub fn removed(&self) -> usize {
        self.delivered + self.discarded
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} delivered={} discarded={} retained={} corrupt={}",
            self.scanned, self.delivered, self.discarded, self.retained, self.corrupt
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Replays the offline backlog
#[derive(Clone)]
pub struct RecoverySweeper {
    store: OfflineStore,
    engine: DeliveryEngine,
}

impl RecoverySweeper {
    pub fn new(store: OfflineStore, engine: DeliveryEngine) -> Self {
        Self { store, engine }
    }

    /// Run one pass over the stored records
    pub async fn sweep(&self) -> StorageResult<SweepReport> {
        let mut report = SweepReport::default();

        for entry in self.store.list_pending()? {
            report.scanned += 1;

            let snapshot = match entry.load() {
                Ok(snapshot) => snapshot,
                Err(e) if e.is_corrupt() => {
                    warn!("Skipping corrupt offline record: {}", e);
                    report.corrupt += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Skipping unreadable offline record: {}", e);
                    report.retained += 1;
                    continue;
                }
            };

            match self.engine.attempt_delivery(&snapshot).await {
                DeliveryResult::Success { .. } => {
                    report.delivered += 1;
                    if let Err(e) = self.store.remove(&entry) {
                        error!("Delivered record could not be removed: {}", e);
                    }
                }
                DeliveryResult::PermanentFailure { reason } => {
                    report.discarded += 1;
                    warn!(
                        "Dropping offline record {} rejected by server: {}",
                        entry.path().display(),
                        reason
                    );
                    if let Err(e) = self.store.remove(&entry) {
                        error!("Rejected record could not be removed: {}", e);
                    }
                }
                DeliveryResult::TransientFailureExhausted {
                    last_error,
                    unreachable,
                    ..
                } => {
                    debug!(
                        "Keeping offline record {}: {}",
                        entry.path().display(),
                        last_error
                    );
                    report.retained += 1;
                    if unreachable {
                        info!("Server unreachable, stopping offline sweep early");
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }

        if report.scanned > 0 {
            info!("Offline sweep finished: {}", report);
        }
        Ok(report)
    }
}
