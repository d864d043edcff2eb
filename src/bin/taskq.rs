//! taskq CLI: run the projector service or the reference worker, or submit a task.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use taskq::broker::{self, ConnectionState, declare_queues};
use taskq::config::Config;
use taskq::config::secrets::redact_uri;
use taskq::model::NewTask;
use taskq::publisher::Publisher;
use taskq::server::{App, shutdown_signal};
use taskq::telemetry::{TelemetryConfig, init_telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "taskq", about = "Broker-backed task service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the projection consumers
    Serve {
        /// Listen address (overrides BIND_ADDR)
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Also run a reference worker in this process
        #[arg(long)]
        embedded_worker: bool,
    },
    /// Run the reference worker
    Worker,
    /// Publish a task straight to the broker
    Submit {
        /// Task type (selects the worker handler)
        task_type: String,
        /// Task payload
        payload: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve {
            bind,
            embedded_worker,
        } => cmd_serve(config, bind, embedded_worker).await,
        Command::Worker => cmd_worker(config).await,
        Command::Submit { task_type, payload } => cmd_submit(config, task_type, payload).await,
    }
}

async fn cmd_serve(
    config: Config,
    bind: Option<SocketAddr>,
    embedded_worker: bool,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    info!(broker = %redact_uri(&config.messaging_uri), "starting projector");
    let broker = broker::connect(&config.messaging_uri)?;
    let app = App::new(broker, &config);

    let listener = tokio::net::TcpListener::bind(bind.unwrap_or(config.bind_addr)).await?;
    let worker_name = embedded_worker.then(|| config.worker_name.clone());
    app.serve(listener, shutdown_signal(), worker_name).await?;
    Ok(())
}

async fn cmd_worker(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    info!(broker = %redact_uri(&config.messaging_uri), worker = %config.worker_name, "starting worker");
    let broker = broker::connect(&config.messaging_uri)?;
    let app = App::new(broker, &config);

    let cancel = CancellationToken::new();
    let tasks = [
        app.spawn_monitor(&cancel),
        tokio::spawn(app.worker(config.worker_name.clone()).run(cancel.clone())),
    ];

    shutdown_signal().await;
    info!("shutdown requested, finishing current task");
    cancel.cancel();

    let drain = async {
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "worker task panicked");
            }
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        warn!(timeout = ?config.shutdown_timeout, "worker shutdown timed out");
    }
    Ok(())
}

async fn cmd_submit(config: Config, task_type: String, payload: String) -> anyhow::Result<()> {
    let new = NewTask::new(task_type, payload)?;

    let broker = broker::connect(&config.messaging_uri)?;
    declare_queues(broker.as_ref(), &config.queues).await?;
    let connection = Arc::new(ConnectionState::new());
    connection.set_connected(true);

    let publisher = Publisher::new(broker, config.queues, connection);
    let submission = publisher.submit(new).await?;

    println!(
        "Submitted: {} (type: {}, status: {})",
        submission.id, submission.task_type, submission.status
    );
    Ok(())
}
