//! CLI command definitions and process entry points.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::reconciler::{Reconciler, ReconcilerConfig};
use crate::store::{self, JobQueue, JobRecordStore, MetricsCounters, ProcessingIndex, Transitions};
use crate::worker::{DelayExecutor, WorkerPool, WorkerPoolConfig};

/// At-least-once job delivery over Redis.
#[derive(Parser)]
#[command(name = "relayd")]
#[command(about = "At-least-once job delivery: gateway, workers and reconciler over Redis")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP submission/status gateway.
    Api(ApiArgs),

    /// Run a worker pool consuming jobs from the queue.
    Worker(WorkerArgs),

    /// Run the reconciliation watchdog for stale claims.
    Reconciler,
}

/// Arguments for `relayd api`.
#[derive(Parser, Debug)]
pub struct ApiArgs {
    /// Listen address; overrides LISTEN_ADDR from the environment.
    #[arg(long)]
    pub listen: Option<String>,
}

/// Arguments for `relayd worker`.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of worker tasks; overrides NUM_WORKERS from the environment.
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the selected subcommand.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Api(args) => {
            if let Some(listen) = args.listen {
                config.listen_addr = listen;
            }
            run_api(config).await
        }
        Commands::Worker(args) => {
            if let Some(workers) = args.workers {
                config.num_workers = workers;
            }
            config.validate()?;
            run_worker(config).await
        }
        Commands::Reconciler => run_reconciler(config).await,
    }
}

async fn run_api(config: Config) -> anyhow::Result<()> {
    let redis = store::connect(&config.redis_url).await?;

    let state = ApiState {
        records: JobRecordStore::new(redis.clone()),
        queue: JobQueue::new(redis.clone()),
        counters: MetricsCounters::new(redis.clone()),
        transitions: Transitions::new(redis.clone()),
        redis,
        job_ttl: config.job_ttl,
    };

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    let redis = store::connect(&config.redis_url).await?;

    let pool_config = WorkerPoolConfig::new(config.num_workers)
        .with_dequeue_timeout(config.dequeue_timeout)
        .with_shutdown_timeout(config.shutdown_timeout)
        .with_max_attempts(config.max_attempts);

    let executor = Arc::new(DelayExecutor::new(config.task_delay));
    let mut pool = WorkerPool::new(
        pool_config,
        JobQueue::new(redis.clone()),
        Transitions::new(redis),
        executor,
    );

    pool.start()?;
    shutdown_signal().await;
    pool.shutdown().await?;

    Ok(())
}

async fn run_reconciler(config: Config) -> anyhow::Result<()> {
    let redis = store::connect(&config.redis_url).await?;

    let reconciler = Reconciler::new(
        ReconcilerConfig {
            sweep_interval: config.reconcile_interval,
            stale_threshold: config.stale_threshold,
            max_attempts: config.max_attempts,
        },
        JobRecordStore::new(redis.clone()),
        ProcessingIndex::new(redis.clone()),
        Transitions::new(redis),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(reconciler.run(shutdown_rx));

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    handle.await?;

    Ok(())
}

async fn shutdown_signal() {
    // Errors installing the handler leave no way to shut down cleanly
    // anyway; treat them as an immediate signal
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
