//! Shared metrics counters.
//!
//! Counters live in the store, not in process memory, so that any number
//! of gateway, worker and reconciler processes increment the same
//! totals. Increments happen inside the transition batches; this type is
//! the read surface. Queue depth is deliberately not a counter — it is
//! always derived from the queue itself to avoid drift.

use redis::aio::ConnectionManager;
use serde::Serialize;

use super::{StoreError, METRIC_COMPLETED, METRIC_FAILED, METRIC_SUBMITTED};

/// Point-in-time values of the job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// Read access to the shared counters.
#[derive(Clone)]
pub struct MetricsCounters {
    redis: ConnectionManager,
}

impl MetricsCounters {
    /// Creates a counter reader over an existing connection manager.
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Reads all counters. A counter that was never incremented reads 0.
    pub async fn snapshot(&self) -> Result<CounterSnapshot, StoreError> {
        let mut conn = self.redis.clone();
        let (submitted, completed, failed): (Option<u64>, Option<u64>, Option<u64>) = redis::cmd(
            "MGET",
        )
        .arg(METRIC_SUBMITTED)
        .arg(METRIC_COMPLETED)
        .arg(METRIC_FAILED)
        .query_async(&mut conn)
        .await?;

        Ok(CounterSnapshot {
            jobs_submitted: submitted.unwrap_or(0),
            jobs_completed: completed.unwrap_or(0),
            jobs_failed: failed.unwrap_or(0),
        })
    }
}
