//! taskq CLI: run a worker, submit tasks, and poll for outcomes.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use taskq::config::Config;
use taskq::engine::{ConnectionSupervisor, Worker};
use taskq::model::TaskId;
use taskq::processor::Processor;
use taskq::store::{self, Queue, ResultStore};
use taskq::submit::Submitter;
use taskq::telemetry::{TelemetryConfig, init_telemetry};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "taskq", about = "Submit tasks, process them asynchronously, poll for results")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker until SIGINT or SIGTERM
    Worker,
    /// Queue a task and print its id
    Submit {
        /// Task kind (reverse, uppercase, slow)
        kind: String,
        /// Text payload
        payload: String,
    },
    /// Print the current outcome of a task as JSON
    Result {
        /// Task id returned by `submit`
        id: String,
    },
    /// Print queue and dead-letter depths
    Stats,
    /// Run migrations and create the queues, then exit
    Migrate,
}

impl Command {
    /// Whether the command sets up store schema and queues before running.
    /// Producers and pollers assume a worker or `migrate` already did.
    fn prepares_store(&self) -> bool {
        matches!(self, Command::Worker | Command::Migrate)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: config.service_name.clone(),
        default_filter: config.log_level.clone(),
    })?;

    let backend = store::open(config.store_url.expose_secret())?;
    ConnectionSupervisor::new(Arc::clone(&backend), config.retry_policy())
        .ensure_ready()
        .await?;

    let queue = Queue::new(Arc::clone(&backend), config.queue_name.clone());
    let dead_letters = queue.dead_letters();
    if cli.command.prepares_store() {
        backend.prepare(&[queue.name(), dead_letters.name()]).await?;
    }
    let results = ResultStore::new(Arc::clone(&backend));

    match cli.command {
        Command::Worker => cmd_worker(&config, queue, results).await,
        Command::Submit { kind, payload } => {
            let submitter = Submitter::new(queue, results);
            let id = submitter.submit(&kind, &payload).await?;
            println!("{id}");
            Ok(())
        }
        Command::Result { id } => {
            let outcome = results.get(&TaskId::from(id)).await?;
            println!("{}", serde_json::to_string(&outcome)?);
            Ok(())
        }
        Command::Stats => cmd_stats(&queue, &dead_letters).await,
        Command::Migrate => {
            info!(queue = queue.name(), "store prepared");
            Ok(())
        }
    }
}

async fn cmd_worker(config: &Config, queue: Queue, results: ResultStore) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let worker = Worker::new(
        queue,
        results,
        Processor::new(),
        config.worker_config(),
        cancel.clone(),
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        cancel.cancel();
    });

    let report = worker.run().await;
    info!(processed = report.processed, "worker exited");
    Ok(())
}

async fn cmd_stats(queue: &Queue, dead_letters: &Queue) -> anyhow::Result<()> {
    println!("{}: {}", queue.name(), queue.length().await?);
    println!("{}: {}", dead_letters.name(), dead_letters.length().await?);
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
