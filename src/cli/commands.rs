//! CLI command definitions for deckflow.
//!
//! This module provides the command-line surface over the orchestrator:
//! the long-running `serve` command and the queue-manager style
//! administration commands used for debugging production queues.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::metrics;
use crate::monitor::HealthMonitor;
use crate::pipeline::{CallbackRouter, PipelineRunner, WorkerDispatcher};
use crate::scheduler::QueueProcessor;
use crate::server::{self, AppState};
use crate::store::{NewTask, Store, TaskStatus};

/// Default priority applied by `queue requeue`.
const REQUEUE_PRIORITY: i32 = 10;

/// Processing queue and pipeline orchestrator for pitch-deck analysis.
#[derive(Parser)]
#[command(name = "deckflow")]
#[command(about = "Processing queue and pipeline orchestrator for pitch-deck analysis")]
#[command(version)]
#[command(
    long_about = "deckflow drives uploaded documents through a four-phase AI pipeline on remote GPU workers.\n\nThe serve command runs the scheduler, health monitor, and HTTP API; the queue commands mirror the production debug tooling.\n\nExample usage:\n  deckflow serve\n  deckflow queue list --status failed"
)]
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
    /// Run the orchestrator: migrations, scheduler, health monitor, HTTP API.
    Serve,

    /// Run database migrations and exit.
    Migrate,

    /// Enqueue a document for processing.
    Enqueue(EnqueueArgs),

    /// Print the status snapshot for a document.
    Status(StatusArgs),

    /// Queue administration commands.
    Queue(QueueArgs),
}

/// Arguments for `deckflow enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Document identifier from the upload service.
    #[arg(long)]
    pub document_id: Uuid,

    /// Input artifact location on shared storage.
    #[arg(long)]
    pub file_path: String,

    /// Scheduling priority; higher is served first.
    #[arg(long, default_value = "0")]
    pub priority: i32,

    /// Pipeline to run.
    #[arg(long, default_value = "pdf_analysis")]
    pub task_type: String,

    /// Tenant identifier.
    #[arg(long)]
    pub company_id: Option<Uuid>,
}

/// Arguments for `deckflow status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Document identifier to query.
    pub document_id: Uuid,
}

/// Queue administration entrypoint arguments.
#[derive(Parser, Debug)]
pub struct QueueArgs {
    /// Queue subcommand to run.
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

/// Queue subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum QueueSubcommand {
    /// List tasks by status with duration and error preview.
    List(QueueListArgs),

    /// Force-requeue a document at elevated priority.
    Requeue(QueueRequeueArgs),

    /// Reset or fail all tasks stuck in processing.
    ResetStuck,

    /// Requeue all failed tasks for another attempt.
    RetryFailed,
}

/// Arguments for `deckflow queue list`.
#[derive(Parser, Debug)]
pub struct QueueListArgs {
    /// Status to list (pending, processing, completed, failed, retry).
    #[arg(long, default_value = "pending")]
    pub status: String,

    /// Maximum rows to print.
    #[arg(long, default_value = "50")]
    pub limit: i64,
}

/// Arguments for `deckflow queue requeue`.
#[derive(Parser, Debug)]
pub struct QueueRequeueArgs {
    /// Document identifier to requeue.
    pub document_id: Uuid,

    /// Priority for the requeued task.
    #[arg(long, default_value_t = REQUEUE_PRIORITY)]
    pub priority: i32,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the command selected on the CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve => run_serve().await,
        Commands::Migrate => run_migrate().await,
        Commands::Enqueue(args) => run_enqueue(args).await,
        Commands::Status(args) => run_status(args).await,
        Commands::Queue(args) => match args.command {
            QueueSubcommand::List(list_args) => run_queue_list(list_args).await,
            QueueSubcommand::Requeue(requeue_args) => run_queue_requeue(requeue_args).await,
            QueueSubcommand::ResetStuck => run_queue_reset_stuck().await,
            QueueSubcommand::RetryFailed => run_queue_retry_failed().await,
        },
    }
}

/// Loads configuration and connects the store.
async fn connect(config: &OrchestratorConfig) -> anyhow::Result<Store> {
    let store = Store::connect(&config.database_url).await?;
    Ok(store)
}

/// Runs the full orchestrator.
async fn run_serve() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    store.run_migrations().await?;
    metrics::init_metrics()?;

    let callbacks = Arc::new(CallbackRouter::new());
    let dispatcher = Arc::new(WorkerDispatcher::new(
        config.callback_url(),
        config.dispatch_timeout,
    )?);
    let runner = Arc::new(PipelineRunner::new(
        store.clone(),
        dispatcher,
        Arc::clone(&callbacks),
        config.phase_timeout,
    ));

    let processor = QueueProcessor::new(store.clone(), runner, config.clone());
    let monitor = HealthMonitor::new(store.clone(), config.clone());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let processor_rx = shutdown_tx.subscribe();
    let processor_handle = tokio::spawn(async move { processor.run(processor_rx).await });

    let monitor_rx = shutdown_tx.subscribe();
    let monitor_handle = tokio::spawn(async move { monitor.run(monitor_rx).await });

    let state = Arc::new(AppState {
        store,
        callbacks,
        config,
    });

    server::serve(state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    // HTTP is down; stop the background loops and wait for them.
    let _ = shutdown_tx.send(());
    let _ = processor_handle.await;
    let _ = monitor_handle.await;

    info!("orchestrator stopped");
    Ok(())
}

/// Runs migrations and exits.
async fn run_migrate() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    store.run_migrations().await?;
    info!("migrations applied");

    Ok(())
}

/// Enqueues one document.
async fn run_enqueue(args: EnqueueArgs) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    let mut new_task = NewTask::new(args.document_id, args.file_path)
        .with_priority(args.priority)
        .with_task_type(args.task_type);
    if let Some(company_id) = args.company_id {
        new_task = new_task.with_company_id(company_id);
    }

    let task = store.tasks().enqueue(new_task).await?;

    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}

/// Prints a document's status snapshot.
async fn run_status(args: StatusArgs) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    match store.tasks().status_snapshot(args.document_id).await? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        None => anyhow::bail!("no task for document {}", args.document_id),
    }
}

/// Lists tasks by status.
async fn run_queue_list(args: QueueListArgs) -> anyhow::Result<()> {
    let status = args
        .status
        .parse::<TaskStatus>()
        .map_err(|e| anyhow::anyhow!(e))?;

    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    let summaries = store.tasks().list_by_status(status, args.limit).await?;

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}

/// Force-requeues a document.
async fn run_queue_requeue(args: QueueRequeueArgs) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    let task = store
        .tasks()
        .requeue_document(args.document_id, args.priority)
        .await?;

    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}

/// Resets all stuck tasks.
async fn run_queue_reset_stuck() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    let sweep = store
        .tasks()
        .reset_stuck(config.stuck_threshold, config.stuck_max_auto_retries)
        .await?;

    println!(
        "reset {} task(s) to pending, failed {} task(s)",
        sweep.reset.len(),
        sweep.failed.len()
    );
    Ok(())
}

/// Requeues all failed tasks.
async fn run_queue_retry_failed() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env()?;
    let store = connect(&config).await?;

    let requeued = store.tasks().retry_failed().await?;

    println!("requeued {} failed task(s)", requeued);
    Ok(())
}
