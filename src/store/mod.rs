//! Redis-backed stores for the delivery core.
//!
//! Every component shares the same Redis instance and synchronizes only
//! through it; there is no in-process locking layer. The stores are thin
//! typed wrappers over fixed keys:
//!
//! - `job_queue` (list): the durable FIFO of [`Envelope`]s — [`queue::JobQueue`]
//! - `job:{id}` (hash, TTL): the per-job record — [`records::JobRecordStore`]
//! - `processing_jobs` (zset, score = claim unix time): the in-flight
//!   index — [`processing::ProcessingIndex`]
//! - `dead_letter` (list): append-only terminal sink — [`queue::JobQueue`]
//! - `metrics:jobs_*` (counters) — [`metrics::MetricsCounters`]
//!
//! Multi-store lifecycle transitions (claim, complete, requeue, dead
//! letter) must not be issued as separate calls; [`transitions::Transitions`]
//! wraps each one in a single atomic pipeline.

pub mod metrics;
pub mod processing;
pub mod queue;
pub mod records;
pub mod transitions;

pub use metrics::{CounterSnapshot, MetricsCounters};
pub use processing::ProcessingIndex;
pub use queue::JobQueue;
pub use records::JobRecordStore;
pub use transitions::Transitions;

use redis::aio::ConnectionManager;
use thiserror::Error;
use uuid::Uuid;

use crate::job::RecordError;

/// Main queue list key.
pub const QUEUE_KEY: &str = "job_queue";
/// Processing index zset key.
pub const PROCESSING_KEY: &str = "processing_jobs";
/// Dead letter list key.
pub const DEAD_LETTER_KEY: &str = "dead_letter";
/// Counter key for submitted jobs.
pub const METRIC_SUBMITTED: &str = "metrics:jobs_submitted";
/// Counter key for completed jobs.
pub const METRIC_COMPLETED: &str = "metrics:jobs_completed";
/// Counter key for failed jobs.
pub const METRIC_FAILED: &str = "metrics:jobs_failed";

/// Key of the record hash for a job id.
pub fn record_key(id: Uuid) -> String {
    format!("job:{id}")
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to establish the initial Redis connection.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// A Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Envelope or dead letter (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A queue element could not be decoded into an envelope.
    ///
    /// Callers discard the element and continue; malformed input is
    /// never retried.
    #[error("Malformed queue element: {0}")]
    MalformedEnvelope(String),

    /// A job record hash could not be parsed.
    #[error("Corrupt record for job {id}: {source}")]
    CorruptRecord {
        id: Uuid,
        #[source]
        source: RecordError,
    },
}

/// Connects to Redis and returns a connection manager.
///
/// The manager handles reconnection automatically and is cheap to clone;
/// all stores for one process should share one.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let client =
        redis::Client::open(redis_url).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

    ConnectionManager::new(client)
        .await
        .map_err(|e| StoreError::ConnectionFailed(e.to_string()))
}

/// Pings the store; used by the health endpoint.
pub async fn ping(redis: &ConnectionManager) -> Result<(), StoreError> {
    let mut conn = redis.clone();
    redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
    Ok(())
}
