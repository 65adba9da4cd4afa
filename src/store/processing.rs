//! Processing index: the in-flight claim set.
//!
//! A Redis sorted set mapping job id to the unix timestamp of its claim.
//! The reconciler's staleness scan is a score range query against it.
//!
//! Claims are only ever inserted inside the begin-processing transition
//! batch (see [`super::Transitions`]), atomically with the `processing`
//! status write, so no observer can see one without the other.

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

use super::{StoreError, PROCESSING_KEY};

/// Time-ordered index of currently-claimed jobs.
#[derive(Clone)]
pub struct ProcessingIndex {
    redis: ConnectionManager,
}

impl ProcessingIndex {
    /// Creates an index over an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Removes a claim unconditionally. No-op if absent.
    pub async fn release(&self, id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.zrem::<_, _, ()>(PROCESSING_KEY, id.to_string()).await?;
        Ok(())
    }

    /// Returns all job ids claimed strictly before the cutoff.
    ///
    /// Order among the returned ids carries no meaning. Members that are
    /// not valid UUIDs are skipped with a warning; nothing in this
    /// subsystem writes such members.
    pub async fn stale_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = conn
            .zrangebyscore(PROCESSING_KEY, "-inf", cutoff.timestamp() as f64)
            .await?;

        let mut ids = Vec::with_capacity(members.len());
        for member in members {
            match member.parse::<Uuid>() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(member = %member, "Non-UUID member in processing index, skipping"),
            }
        }
        Ok(ids)
    }

    /// Number of in-flight claims, for observability.
    pub async fn len(&self) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.zcard(PROCESSING_KEY).await?;
        Ok(len)
    }

    /// Returns whether a claim exists for the job.
    pub async fn contains(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let score: Option<f64> = conn.zscore(PROCESSING_KEY, id.to_string()).await?;
        Ok(score.is_some())
    }
}
