//! Queue store and dead letter surface.
//!
//! The main queue is a Redis list: RPUSH on enqueue, BLPOP on dequeue.
//! BLPOP is the sole mutual-exclusion primitive of the system — it
//! delivers each element to exactly one of any number of concurrent
//! consumers, which is what guarantees one job has at most one owning
//! worker at a time.
//!
//! The dead letter list is append-only from this subsystem's point of
//! view; inspection is non-destructive.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{StoreError, DEAD_LETTER_KEY, QUEUE_KEY};
use crate::job::{DeadLetterEntry, Envelope};

/// Redis-backed FIFO channel of job envelopes.
#[derive(Clone)]
pub struct JobQueue {
    redis: ConnectionManager,
}

impl JobQueue {
    /// Creates a queue over an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Appends an envelope to the queue tail.
    pub async fn enqueue(&self, envelope: &Envelope) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(envelope)?;
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(QUEUE_KEY, serialized).await?;
        Ok(())
    }

    /// Removes and returns the head envelope, blocking until one is
    /// available or the timeout expires.
    ///
    /// Returns `Ok(None)` on timeout. An element that cannot be decoded
    /// is reported as [`StoreError::MalformedEnvelope`]; it has already
    /// been consumed and the caller should discard it and continue.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Envelope>, StoreError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BLPOP returns (key, element) or nil on timeout
        let result: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(QUEUE_KEY)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some((_, data)) => match serde_json::from_str::<Envelope>(&data) {
                Ok(envelope) => Ok(Some(envelope)),
                Err(_) => Err(StoreError::MalformedEnvelope(data)),
            },
            None => Ok(None),
        }
    }

    /// Current queue length. A point-in-time estimate, not a guarantee.
    pub async fn depth(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(QUEUE_KEY).await?;
        Ok(len)
    }

    /// Number of entries in the dead letter store.
    pub async fn dead_letter_len(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(DEAD_LETTER_KEY).await?;
        Ok(len)
    }

    /// Reads up to `limit` dead letter entries without removing them.
    pub async fn peek_dead_letter(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(DEAD_LETTER_KEY, 0, limit as isize - 1)
            .await?;

        let entries: Result<Vec<DeadLetterEntry>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();

        Ok(entries?)
    }
}
