//! Append-only audit sink, strictly ordered by `audit_id`. Uses a bounded
//! `crossbeam-channel` so a slow consumer applies back-pressure rather than
//! unbounded memory growth, rather than spawning unbounded tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, SendTimeoutError};
use tracing::warn;

use crate::error::CoreError;
use crate::types::{Fingerprint, TrackingToken, VerdictAction};

const CHANNEL_CAPACITY: usize = 4096;
const SEND_TIMEOUT: Duration = Duration::from_millis(50);

/// One append-only record. `audit_id` is globally monotonic: two records
/// never compare equal, and the sink never reorders what it receives.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub audit_id: u64,
    pub timestamp: u64,
    pub fingerprint: Fingerprint,
    pub action: VerdictAction,
    pub scenario_name: Option<String>,
    pub tracking_token: Option<TrackingToken>,
}

/// Producer handle held by `Orchestrator`. Cheap to clone (wraps an `Arc`
/// counter and a channel sender).
#[derive(Clone)]
pub struct AuditSink {
    next_id: Arc<AtomicU64>,
    tx: Sender<AuditRecord>,
}

impl AuditSink {
    /// Returns the sink and the paired `Receiver` the caller's consumer
    /// task should drain. Splitting construction from consumption keeps
    /// the sink itself free of any assumption about how records are
    /// persisted (file, network, in-memory ring — all out of scope here).
    pub fn new() -> (Self, Receiver<AuditRecord>) {
        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        (
            Self {
                next_id: Arc::new(AtomicU64::new(1)),
                tx,
            },
            rx,
        )
    }

    /// Appends a record, assigning it the next audit id. Blocks up to
    /// `SEND_TIMEOUT` under back-pressure before failing; the orchestrator
    /// treats a failure here as fatal for the current request, degrading to
    /// a fail-closed block.
    pub fn append(
        &self,
        timestamp: u64,
        fingerprint: Fingerprint,
        action: VerdictAction,
        scenario_name: Option<String>,
        tracking_token: Option<TrackingToken>,
    ) -> Result<u64, CoreError> {
        let audit_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = AuditRecord {
            audit_id,
            timestamp,
            fingerprint,
            action,
            scenario_name,
            tracking_token,
        };
        match self.tx.send_timeout(record, SEND_TIMEOUT) {
            Ok(()) => Ok(audit_id),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(audit_id, "audit channel saturated, dropping request");
                Err(CoreError::AuditAppendFailure {
                    reason: "audit channel saturated".to_string(),
                })
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                warn!(audit_id, "audit channel has no consumer");
                Err(CoreError::AuditAppendFailure {
                    reason: "audit channel disconnected".to_string(),
                })
            }
        }
    }
}
