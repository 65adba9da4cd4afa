//! Reconciliation watchdog for stale claims.
//!
//! Workers crash and hang; their claims stay behind in the processing
//! index. The reconciler sweeps the index on a fixed interval, and for
//! every claim older than the staleness threshold re-reads the job
//! record and recovers the job: requeue it, dead-letter it, force-fail
//! it, or just drop the orphaned claim.
//!
//! The re-read immediately before acting is the race-resolution
//! mechanism against a worker concluding the same job concurrently —
//! optimistic, not transactional. Candidates are failure-isolated: one
//! candidate's error is logged and the sweep moves on. A second sweep
//! with no intervening worker activity is a no-op, because every
//! recovery action removes the candidate's claim.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::job::{Envelope, JobRecord, JobStatus};
use crate::store::{JobRecordStore, ProcessingIndex, StoreError, Transitions};

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to sweep the processing index.
    pub sweep_interval: Duration,
    /// Claims older than this are presumed abandoned.
    pub stale_threshold: Duration,
    /// Total attempts allowed per job (shared with the workers).
    pub max_attempts: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(300),
            max_attempts: 4,
        }
    }
}

/// Why a claim is dropped without touching the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No record exists (TTL expiry or never created): orphan cleanup.
    RecordMissing,
    /// The owning worker already transitioned the job but its claim
    /// removal was lost; the record is authoritative.
    AlreadyTransitioned(JobStatus),
}

/// Recovery action planned for one stale claim.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// Remove the claim; the record needs no change.
    DropClaim(DropReason),
    /// Fail the record terminally without a dead letter entry; the
    /// payload is gone so there is nothing safe to re-deliver.
    ForceFail,
    /// Put the re-derived envelope back on the queue.
    Requeue(Envelope),
    /// Retries exhausted; move the re-derived envelope to the dead
    /// letter store.
    DeadLetter(Envelope),
}

/// Plans the recovery for a stale claim from a fresh read of its record.
///
/// Pure decision logic; all store effects happen in the caller. `now` is
/// only used as the `created_at` fallback when re-deriving an envelope
/// from a record that lost its creation time.
pub fn plan_recovery(
    id: Uuid,
    record: Option<&JobRecord>,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> RecoveryAction {
    let Some(record) = record else {
        return RecoveryAction::DropClaim(DropReason::RecordMissing);
    };

    if record.status != JobStatus::Processing {
        return RecoveryAction::DropClaim(DropReason::AlreadyTransitioned(record.status));
    }

    let Some(task) = record.task.as_deref() else {
        return RecoveryAction::ForceFail;
    };

    let attempts = record.attempts + 1;
    let envelope = Envelope {
        id,
        task: task.to_string(),
        attempts,
        created_at: record.created_at.unwrap_or(now),
    };

    if attempts < max_attempts {
        RecoveryAction::Requeue(envelope)
    } else {
        RecoveryAction::DeadLetter(envelope)
    }
}

/// Periodic watchdog sweeping the processing index for stale claims.
pub struct Reconciler {
    config: ReconcilerConfig,
    records: JobRecordStore,
    index: ProcessingIndex,
    transitions: Transitions,
}

impl Reconciler {
    /// Creates a reconciler over shared stores.
    pub fn new(
        config: ReconcilerConfig,
        records: JobRecordStore,
        index: ProcessingIndex,
        transitions: Transitions,
    ) -> Self {
        Self {
            config,
            records,
            index,
            transitions,
        }
    }

    /// Runs sweeps on the configured interval until shutdown.
    ///
    /// Sweep errors are logged and the loop continues; the watchdog never
    /// terminates on infrastructure failure.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            threshold_secs = self.config.stale_threshold.as_secs(),
            "Reconciler started"
        );

        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Reconciler sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Reconciler received shutdown signal");
                    break;
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Sweeps once: scans for stale claims and recovers each candidate
    /// independently. Returns the number of candidates examined.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(self.config.stale_threshold.as_secs() as i64);

        let candidates = self.index.stale_before(cutoff).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        info!(count = candidates.len(), "Found potential stale jobs");

        let examined = candidates.len();
        for id in candidates {
            // One candidate's failure never aborts the sweep
            if let Err(e) = self.reconcile_job(id).await {
                error!(job_id = %id, error = %e, "Error reconciling job");
            }
        }

        Ok(examined)
    }

    /// Recovers a single stale claim.
    async fn reconcile_job(&self, id: Uuid) -> Result<(), StoreError> {
        let record = self.records.get(id).await?;
        let now = Utc::now();

        match plan_recovery(id, record.as_ref(), self.config.max_attempts, now) {
            RecoveryAction::DropClaim(DropReason::RecordMissing) => {
                warn!(job_id = %id, "Stale claim with no job record, cleaning up orphan");
                self.index.release(id).await
            }
            RecoveryAction::DropClaim(DropReason::AlreadyTransitioned(status)) => {
                info!(
                    job_id = %id,
                    status = %status,
                    "Job no longer processing, removing stale claim"
                );
                self.index.release(id).await
            }
            RecoveryAction::ForceFail => {
                error!(job_id = %id, "Job payload missing, cannot requeue");
                self.transitions
                    .force_fail(id, "Reconciler: payload missing", now)
                    .await
            }
            RecoveryAction::Requeue(envelope) => {
                warn!(
                    job_id = %id,
                    attempts = envelope.attempts,
                    stale_secs = self.config.stale_threshold.as_secs(),
                    "Stale job requeued"
                );
                self.transitions.requeue(&envelope).await
            }
            RecoveryAction::DeadLetter(envelope) => {
                let reason = format!(
                    "Reconciler: stale after {}s",
                    self.config.stale_threshold.as_secs()
                );
                error!(
                    job_id = %id,
                    attempts = envelope.attempts,
                    "Stale job moved to dead letter queue"
                );
                self.transitions.dead_letter(&envelope, &reason, now).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn processing_record(id: Uuid, task: Option<&str>, attempts: u32) -> JobRecord {
        let mut fields: HashMap<String, String> = HashMap::from([
            ("status".to_string(), "processing".to_string()),
            ("attempts".to_string(), attempts.to_string()),
            (
                "created_at".to_string(),
                "2025-02-03T12:00:00+00:00".to_string(),
            ),
        ]);
        if let Some(task) = task {
            fields.insert("task".to_string(), task.to_string());
        }
        JobRecord::from_hash(id, &fields).expect("fixture should parse")
    }

    #[test]
    fn test_plan_missing_record_drops_claim() {
        let action = plan_recovery(Uuid::new_v4(), None, 4, Utc::now());
        assert_eq!(action, RecoveryAction::DropClaim(DropReason::RecordMissing));
    }

    #[test]
    fn test_plan_already_transitioned_drops_claim() {
        let id = Uuid::new_v4();
        let mut record = processing_record(id, Some("hello"), 1);
        record.status = JobStatus::Completed;

        let action = plan_recovery(id, Some(&record), 4, Utc::now());
        assert_eq!(
            action,
            RecoveryAction::DropClaim(DropReason::AlreadyTransitioned(JobStatus::Completed))
        );
    }

    #[test]
    fn test_plan_missing_payload_force_fails() {
        let id = Uuid::new_v4();
        let record = processing_record(id, None, 0);

        let action = plan_recovery(id, Some(&record), 4, Utc::now());
        assert_eq!(action, RecoveryAction::ForceFail);
    }

    #[test]
    fn test_plan_requeues_with_incremented_attempts() {
        let id = Uuid::new_v4();
        let record = processing_record(id, Some("hello"), 0);

        match plan_recovery(id, Some(&record), 4, Utc::now()) {
            RecoveryAction::Requeue(envelope) => {
                assert_eq!(envelope.id, id);
                assert_eq!(envelope.task, "hello");
                assert_eq!(envelope.attempts, 1);
                assert_eq!(
                    envelope.created_at,
                    record.created_at.expect("fixture has created_at")
                );
            }
            other => panic!("expected Requeue, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_dead_letters_at_max_attempts() {
        let id = Uuid::new_v4();
        let record = processing_record(id, Some("hello"), 3);

        match plan_recovery(id, Some(&record), 4, Utc::now()) {
            RecoveryAction::DeadLetter(envelope) => {
                assert_eq!(envelope.attempts, 4);
            }
            other => panic!("expected DeadLetter, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_falls_back_to_now_for_missing_created_at() {
        let id = Uuid::new_v4();
        let fields: HashMap<String, String> = HashMap::from([
            ("status".to_string(), "processing".to_string()),
            ("task".to_string(), "hello".to_string()),
        ]);
        let record = JobRecord::from_hash(id, &fields).expect("should parse");
        let now = Utc::now();

        match plan_recovery(id, Some(&record), 4, now) {
            RecoveryAction::Requeue(envelope) => assert_eq!(envelope.created_at, now),
            other => panic!("expected Requeue, got {:?}", other),
        }
    }

    #[test]
    fn test_reconciler_config_default() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.stale_threshold, Duration::from_secs(300));
        assert_eq!(config.max_attempts, 4);
    }
}
