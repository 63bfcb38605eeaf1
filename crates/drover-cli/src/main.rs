//! # Drover
//!
//! Operator entry point for the request orchestrator: submit and process
//! jobs, inspect the ledger, cancel work and resume after a crash.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use drover_config::ConfigLoader;
use drover_core::{init_tracing, JobId};
use drover_jobs::{register_metrics, JobRecord, JobStatus, ProcessSummary, RequestManager};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod app;
mod http;

#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(version)]
#[command(about = "Durable request orchestration for rate-limited retrieval")]
#[command(propagate_version = true)]
struct Args {
    /// Directory holding default.toml and environment overrides
    #[arg(long, global = true, default_value = "config")]
    config_dir: PathBuf,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit jobs from a JSON file, then process everything scheduled
    Process {
        /// JSON list of {capability, operation, params, priority?}
        file: Option<PathBuf>,
    },

    /// List jobs, optionally filtered by status
    ListRequests {
        /// queued, in_progress, completed, failed or cancelled
        statuses: Vec<JobStatus>,
    },

    /// Cancel the given jobs, or every active job when none are given
    ClearRequests { ids: Vec<String> },

    /// Cancel one job
    Cancel { id: String },

    /// Re-queue failed jobs and process everything incomplete
    Resume,

    /// Show one job
    Status { id: String },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ConfigLoader::new(&args.config_dir)
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config.logging)?;
    register_metrics();

    info!("Starting drover {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let manager = app::build_manager(&config, shutdown).await?;

    match args.command {
        Commands::Process { file } => {
            let specs = match file {
                Some(path) => RequestManager::load_submissions(&path).await?,
                None => Vec::new(),
            };
            let summary = manager.process_jobs(specs).await?;
            print_summary(&summary, &args.output)?;
        }
        Commands::ListRequests { statuses } => {
            let jobs = manager.list(&statuses).await;
            print_jobs(&jobs, &args.output)?;
        }
        Commands::ClearRequests { ids } => {
            let ids: Vec<JobId> = ids.into_iter().map(JobId::from).collect();
            let cancelled = manager.clear(&ids).await?;
            println!("Cancelled {} job(s)", cancelled.len());
            for id in cancelled {
                println!("  {id}");
            }
        }
        Commands::Cancel { id } => {
            let id = JobId::from(id);
            if manager.cancel(&id).await? {
                println!("Job {id} cancelled");
            } else {
                println!("Job {id} is not active, nothing to cancel");
            }
        }
        Commands::Resume => {
            let scheduled = manager.resume_incomplete().await?;
            info!(scheduled, "Resuming incomplete jobs");
            let summary = manager.run_workers().await?;
            print_summary(&summary, &args.output)?;
        }
        Commands::Status { id } => {
            let id = JobId::from(id);
            let record = manager
                .status(&id)
                .await
                .with_context(|| format!("Unknown job {id}"))?;
            print_job(&record, &args.output)?;
        }
    }

    Ok(())
}

fn print_summary(summary: &ProcessSummary, output: &OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "submitted": summary.submitted,
                "skipped": summary.skipped,
                "completed": summary.completed,
                "failed": summary.failed,
                "cancelled": summary.cancelled,
                "interrupted": summary.interrupted,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Table => {
            println!("Submitted:   {}", summary.submitted);
            println!("Skipped:     {}", summary.skipped);
            println!("Completed:   {}", summary.completed);
            println!("Failed:      {}", summary.failed);
            println!("Cancelled:   {}", summary.cancelled);
            println!("Interrupted: {}", summary.interrupted);
        }
    }
    Ok(())
}

fn print_jobs(jobs: &[JobRecord], output: &OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(jobs)?),
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<18} {:<12} {:>8} {:<12} OPERATION",
                "JOB ID", "STATUS", "PRIORITY", "CAPABILITY"
            );
            println!("{}", "-".repeat(80));
            for job in jobs {
                println!(
                    "{:<18} {:<12} {:>8} {:<12} {}",
                    job.id.short(),
                    job.status,
                    job.priority(),
                    job.capability(),
                    job.request_details.operation
                );
            }
            println!();
            println!("{} job(s)", jobs.len());
        }
    }
    Ok(())
}

fn print_job(job: &JobRecord, output: &OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(job)?),
        OutputFormat::Table => {
            println!("Job ID:       {}", job.id);
            println!("Status:       {}", job.status);
            println!("Capability:   {}", job.capability());
            println!("Operation:    {}", job.request_details.operation);
            println!("Priority:     {}", job.priority());
            println!("Attempts:     {}", job.attempts);
            println!("Created:      {}", job.created_at.to_rfc3339());
            println!("Last updated: {}", job.last_updated.to_rfc3339());
            if !job.progress.is_empty() {
                println!("Progress:     {}", serde_json::Value::Object(job.progress.clone()));
            }
            if let Some(result) = &job.result {
                println!(
                    "Result:       {} records in {} calls",
                    result.records_fetched, result.external_call_count
                );
            }
            if let Some(failure) = &job.error {
                println!("Error:        {}", failure.message);
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current step...");
        }
        () = terminate => {
            info!("Received terminate signal, stopping after the current step...");
        }
    }
}
