//! Atomic lifecycle transition batches.
//!
//! There is no cross-store transaction manager, so every transition that
//! touches more than one store (record + index, record + queue + index,
//! ...) is issued as a single `MULTI`/`EXEC` pipeline: either all of its
//! sub-writes become visible or none do. No observer can see a
//! `processing` record without its claim, a requeued record without its
//! envelope back on the queue, or a failed record without its counter
//! increment.
//!
//! Atomicity holds per transition only. Nothing spans two transitions or
//! two jobs; races between a worker and the reconciler acting on the same
//! job are resolved by the reconciler re-reading the record first, not by
//! locking.

use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use uuid::Uuid;

use super::{
    record_key, StoreError, DEAD_LETTER_KEY, METRIC_COMPLETED, METRIC_FAILED, METRIC_SUBMITTED,
    PROCESSING_KEY, QUEUE_KEY,
};
use crate::job::{DeadLetterEntry, Envelope};

/// Issues lifecycle transitions as all-or-nothing batches.
#[derive(Clone)]
pub struct Transitions {
    redis: ConnectionManager,
}

impl Transitions {
    /// Creates a transition surface over an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Gateway transition: create the record (status `queued`, with TTL),
    /// enqueue the envelope and count the submission.
    pub async fn submit(&self, envelope: &Envelope, ttl: Duration) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(envelope)?;
        let key = record_key(envelope.id);
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &key,
                &[
                    ("status", "queued".to_string()),
                    ("task", envelope.task.clone()),
                    ("attempts", envelope.attempts.to_string()),
                    ("created_at", envelope.created_at.to_rfc3339()),
                ],
            )
            .expire(&key, ttl.as_secs() as i64)
            .rpush(QUEUE_KEY, serialized)
            .incr(METRIC_SUBMITTED, 1);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Worker transition into `processing`: status write and claim insert
    /// in one batch. The claim is what makes the job visible to the
    /// reconciler, so it is never optional.
    pub async fn begin_processing(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &record_key(id),
                &[
                    ("status", "processing".to_string()),
                    ("worker_id", worker_id.to_string()),
                ],
            )
            .zadd(PROCESSING_KEY, id.to_string(), now.timestamp() as f64);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Terminal success: record goes `completed`, claim is released, the
    /// completed counter is incremented.
    pub async fn complete(
        &self,
        id: Uuid,
        result: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &record_key(id),
                &[
                    ("status", "completed".to_string()),
                    ("result", result.to_string()),
                    ("completed_at", now.to_rfc3339()),
                ],
            )
            .zrem(PROCESSING_KEY, id.to_string())
            .incr(METRIC_COMPLETED, 1);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Retry transition: record back to `queued` with the incremented
    /// attempt count, envelope back on the queue, claim released.
    ///
    /// The envelope must already carry the incremented `attempts` and the
    /// original `created_at`. Used by both the worker and the reconciler.
    pub async fn requeue(&self, envelope: &Envelope) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(envelope)?;
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &record_key(envelope.id),
                &[
                    ("status", "queued".to_string()),
                    ("attempts", envelope.attempts.to_string()),
                ],
            )
            .rpush(QUEUE_KEY, serialized)
            .zrem(PROCESSING_KEY, envelope.id.to_string());
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Terminal failure after exhausted retries: record goes `failed`,
    /// the envelope lands in the dead letter store, claim released,
    /// failed counter incremented.
    pub async fn dead_letter(
        &self,
        envelope: &Envelope,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let entry = DeadLetterEntry {
            envelope: envelope.clone(),
            error: error.to_string(),
            moved_at: now,
        };
        let serialized = serde_json::to_string(&entry)?;
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &record_key(envelope.id),
                &[
                    ("status", "failed".to_string()),
                    ("error", error.to_string()),
                    ("failed_at", now.to_rfc3339()),
                    ("attempts", envelope.attempts.to_string()),
                ],
            )
            .rpush(DEAD_LETTER_KEY, serialized)
            .zrem(PROCESSING_KEY, envelope.id.to_string())
            .incr(METRIC_FAILED, 1);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Reconciler transition for a stale claim whose payload is gone:
    /// the record fails terminally and the claim is released, but no dead
    /// letter entry is written because there is nothing safe to
    /// re-deliver.
    pub async fn force_fail(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &record_key(id),
                &[
                    ("status", "failed".to_string()),
                    ("error", error.to_string()),
                    ("failed_at", now.to_rfc3339()),
                ],
            )
            .zrem(PROCESSING_KEY, id.to_string())
            .incr(METRIC_FAILED, 1);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }
}
