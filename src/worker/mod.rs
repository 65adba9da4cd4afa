//! Worker pool: consumes envelopes and drives every non-watchdog
//! lifecycle transition.
//!
//! Each worker runs as an independent async task sharing only the Redis
//! stores with its peers. The blocking single-delivery dequeue is the
//! only thing guaranteeing one job has one concurrent owner; there is no
//! extra locking.
//!
//! A worker's loop per envelope:
//!
//! 1. blocking dequeue (malformed elements are discarded, never retried)
//! 2. atomic transition to `processing` + claim registration
//! 3. synchronous task execution (no in-process timeout — staleness
//!    detection by the reconciler is the stuck-job detector)
//! 4. atomic terminal / retry / dead-letter transition
//!
//! Infrastructure errors are logged and the loop continues; workers never
//! terminate the process on them.

pub mod executor;

pub use executor::{DelayExecutor, TaskError, TaskExecutor};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::job::Envelope;
use crate::store::{JobQueue, StoreError, Transitions};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A store operation failed.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a blocking dequeue waits before re-checking for shutdown.
    pub dequeue_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Total attempts allowed per job (first execution included).
    pub max_attempts: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            dequeue_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            max_attempts: 4,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the dequeue timeout.
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the maximum total attempts per job.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// What to do with a job after a failed execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempts remain; re-enqueue for another delivery.
    Retry,
    /// Attempts exhausted; move to the dead letter store.
    DeadLetter,
}

/// Decides between retry and dead letter for a failed attempt.
///
/// `attempts` is the count including the attempt that just failed.
pub fn retry_decision(attempts: u32, max_attempts: u32) -> RetryDecision {
    if attempts < max_attempts {
        RetryDecision::Retry
    } else {
        RetryDecision::DeadLetter
    }
}

/// Pool of workers processing jobs from the shared queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: JobQueue,
    transitions: Transitions,
    executor: Arc<dyn TaskExecutor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a worker pool over shared stores and a task executor.
    pub fn new(
        config: WorkerPoolConfig,
        queue: JobQueue,
        transitions: Transitions,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        // Buffer size of 1 is sufficient since shutdown is sent once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            transitions,
            executor,
            shutdown_tx,
            worker_handles: Vec::new(),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: self.queue.clone(),
                transitions: self.transitions.clone(),
                executor: Arc::clone(&self.executor),
                shutdown_rx: self.shutdown_tx.subscribe(),
                dequeue_timeout: self.config.dequeue_timeout,
                max_attempts: self.config.max_attempts,
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish the envelope they are processing before stopping.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single worker consuming envelopes from the shared queue.
pub struct Worker {
    id: String,
    queue: JobQueue,
    transitions: Transitions,
    executor: Arc<dyn TaskExecutor>,
    shutdown_rx: broadcast::Receiver<()>,
    dequeue_timeout: Duration,
    max_attempts: u32,
}

impl Worker {
    /// Main worker loop.
    ///
    /// Continuously dequeues and processes envelopes until a shutdown
    /// signal is received.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.dequeue(self.dequeue_timeout).await {
                Ok(Some(envelope)) => {
                    self.process_envelope(envelope).await;
                }
                Ok(None) => {
                    // Dequeue already blocked for the timeout; loop to
                    // re-check shutdown
                    debug!(worker_id = %self.id, "No jobs available");
                }
                Err(StoreError::MalformedEnvelope(raw)) => {
                    // Malformed input is dropped, never retried
                    warn!(worker_id = %self.id, raw = %raw, "Discarding malformed queue element");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.dequeue_timeout).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Drives one envelope through claim, execution and its terminal or
    /// retry transition.
    async fn process_envelope(&self, envelope: Envelope) {
        let job_id = envelope.id;

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            attempt = envelope.attempts + 1,
            "Processing job"
        );

        // Status write and claim insert land in one batch; if this fails
        // the envelope is already consumed and only the record (still
        // `queued`) survives, which the TTL eventually clears. That gap
        // is inherent to dequeue-then-claim without a cross-store
        // transaction.
        if let Err(e) = self
            .transitions
            .begin_processing(job_id, &self.id, Utc::now())
            .await
        {
            error!(
                worker_id = %self.id,
                job_id = %job_id,
                error = %e,
                "Failed to claim job, dropping envelope"
            );
            return;
        }

        match self.executor.execute(&envelope.task).await {
            Ok(result) => {
                if let Err(e) = self.transitions.complete(job_id, &result, Utc::now()).await {
                    error!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        "Failed to mark job complete"
                    );
                    return;
                }
                info!(worker_id = %self.id, job_id = %job_id, "Job completed");
            }
            Err(task_err) => {
                let attempts = envelope.attempts + 1;
                match retry_decision(attempts, self.max_attempts) {
                    RetryDecision::Retry => {
                        warn!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %task_err,
                            attempts = attempts,
                            "Job failed, requeueing for retry"
                        );
                        let retry = envelope.with_attempts(attempts);
                        if let Err(e) = self.transitions.requeue(&retry).await {
                            error!(
                                worker_id = %self.id,
                                job_id = %job_id,
                                error = %e,
                                "Failed to requeue job"
                            );
                        }
                    }
                    RetryDecision::DeadLetter => {
                        error!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %task_err,
                            attempts = attempts,
                            "Job failed, moving to dead letter queue"
                        );
                        let terminal = envelope.with_attempts(attempts);
                        if let Err(e) = self
                            .transitions
                            .dead_letter(&terminal, &task_err.to_string(), Utc::now())
                            .await
                        {
                            error!(
                                worker_id = %self.id,
                                job_id = %job_id,
                                error = %e,
                                "Failed to move job to dead letter queue"
                            );
                        }
                    }
                }
            }
        }
    }
}
