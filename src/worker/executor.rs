//! Task execution behind the worker.
//!
//! The delivery core treats task payloads as opaque; execution is
//! abstracted behind [`TaskExecutor`] so the lifecycle machinery does not
//! depend on any particular workload. Executors must be safe under
//! duplicate and out-of-order execution: the at-least-once delivery model
//! can hand the same job to two workers when a slow execution is
//! reclaimed by the reconciler.
//!
//! [`DelayExecutor`] is the stub workload: a fixed sleep, with the
//! literal payload `"fail"` as a fault-injection sentinel for tests and
//! demos.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Payload sentinel that makes [`DelayExecutor`] fail on purpose.
pub const FAIL_SENTINEL: &str = "fail";

/// Domain failure during task execution.
///
/// Drives the retry/dead-letter decision inside the worker loop and
/// never propagates past it.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Fault injected via the `"fail"` sentinel payload.
    #[error("Simulated failure for task '{0}'")]
    Simulated(String),

    /// Real execution failure reported by an executor.
    #[error("Task execution failed: {0}")]
    Failed(String),
}

/// Executes opaque task payloads on behalf of workers.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs the task to completion, returning its result string.
    ///
    /// Execution is synchronous from the worker's perspective; no
    /// timeout is imposed here. Stuck executions are detected by the
    /// reconciler through claim staleness instead.
    async fn execute(&self, task: &str) -> Result<String, TaskError>;
}

/// Fixed-delay stub executor.
pub struct DelayExecutor {
    delay: Duration,
}

impl DelayExecutor {
    /// Creates an executor that sleeps for `delay` per task.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl TaskExecutor for DelayExecutor {
    async fn execute(&self, task: &str) -> Result<String, TaskError> {
        tokio::time::sleep(self.delay).await;

        if task == FAIL_SENTINEL {
            return Err(TaskError::Simulated(task.to_string()));
        }

        Ok(format!("Processed task: {task}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delay_executor_success() {
        let executor = DelayExecutor::new(Duration::ZERO);
        let result = executor.execute("hello").await.expect("should succeed");

        assert!(!result.is_empty());
        assert!(result.contains("hello"));
    }

    #[tokio::test]
    async fn test_delay_executor_fail_sentinel() {
        let executor = DelayExecutor::new(Duration::ZERO);
        let err = executor
            .execute(FAIL_SENTINEL)
            .await
            .expect_err("sentinel should fail");

        assert!(err.to_string().contains("Simulated failure"));
    }

    #[tokio::test]
    async fn test_delay_executor_sentinel_must_match_exactly() {
        let executor = DelayExecutor::new(Duration::ZERO);
        assert!(executor.execute("failing").await.is_ok());
        assert!(executor.execute("FAIL").await.is_ok());
    }
}
