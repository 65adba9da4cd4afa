//! Job record store.
//!
//! One Redis hash per job at `job:{id}`, created with a TTL at
//! submission. Expiry is silent deletion: a missing record is a
//! legitimate answer, not an error, and callers (especially the
//! reconciler) must treat it as one.
//!
//! All writes to records happen inside [`super::Transitions`] batches;
//! this type is the read surface.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::{record_key, StoreError};
use crate::job::JobRecord;

/// Read access to per-job status records.
#[derive(Clone)]
pub struct JobRecordStore {
    redis: ConnectionManager,
}

impl JobRecordStore {
    /// Creates a record store over an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Fetches and parses the record for a job.
    ///
    /// Returns `Ok(None)` when the record does not exist (never created,
    /// or TTL-expired). A hash that exists but cannot be parsed is
    /// reported as [`StoreError::CorruptRecord`].
    pub async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = conn.hgetall(record_key(id)).await?;

        if fields.is_empty() {
            return Ok(None);
        }

        JobRecord::from_hash(id, &fields)
            .map(Some)
            .map_err(|source| StoreError::CorruptRecord { id, source })
    }

    /// Returns whether a record exists for the job.
    pub async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(record_key(id)).await?;
        Ok(exists)
    }
}
