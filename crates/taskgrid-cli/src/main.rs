//! TaskGrid CLI - Command line interface for the TaskGrid engine.

use std::time::Duration;

use clap::{Parser, Subcommand};
use taskgrid_core::{ProgressEntry, TaskState};
use tracing_subscriber::EnvFilter;

mod client;
mod error;

use client::{HttpClient, Identity, SubmitRequest, TaskOutcome, TaskSummary};
use error::ClientError;

/// TaskGrid CLI - submit and track jobs
#[derive(Parser)]
#[command(name = "taskgrid")]
#[command(about = "CLI for the TaskGrid engine", long_about = None)]
struct Cli {
    /// Engine HTTP address
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Principal to act as
    #[arg(short, long, env = "TASKGRID_PRINCIPAL")]
    principal: Option<String>,

    /// Authorities of the principal (repeatable)
    #[arg(long = "authority")]
    authorities: Vec<String>,

    /// Address for completion notices
    #[arg(long)]
    email: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job
    Submit {
        /// Task type to run
        task_type: String,

        /// Entity the job works on
        #[arg(short, long)]
        target: Option<String>,

        /// Parameters as JSON
        #[arg(long, default_value = "null")]
        params: String,

        /// Explicit task ID
        #[arg(long)]
        id: Option<String>,

        /// Prefer a remote worker
        #[arg(long)]
        remote: bool,

        /// Fail instead of running locally when no worker can take it
        #[arg(long)]
        remote_only: bool,

        /// Minutes the job may wait in the queue
        #[arg(long)]
        max_queue_minutes: Option<u32>,

        /// Minutes the job may run
        #[arg(long)]
        max_runtime_minutes: Option<u32>,

        /// Mail the submitter when the job ends
        #[arg(long)]
        email_alert: bool,
    },

    /// Show task status
    Status {
        /// Task ID
        id: String,
    },

    /// Show task progress
    Progress {
        /// Task ID
        id: String,

        /// First entry to show
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Keep polling until the task ends
        #[arg(short, long)]
        follow: bool,
    },

    /// Show the outcome of a finished task
    Result {
        /// Task ID
        id: String,
    },

    /// Cancel a task
    Cancel {
        /// Task ID to cancel
        id: String,
    },

    /// Ask for a completion notice
    #[command(name = "email-alert")]
    EmailAlert {
        /// Task ID
        id: String,
    },

    /// List all tasks (admin)
    List,

    /// List connected workers
    Workers,

    /// Check engine health
    Health,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = HttpClient::new(
        &cli.url,
        Identity {
            principal: cli.principal,
            authorities: cli.authorities,
            email: cli.email,
        },
    );

    if let Err(e) = run(&client, cli.command).await {
        eprintln!("Error: {e}");
        if let ClientError::Api {
            conflicting_task_id: Some(existing),
            ..
        } = &e
        {
            eprintln!("Conflicting task: {existing}");
        }
        std::process::exit(1);
    }
}

async fn run(client: &HttpClient, command: Commands) -> Result<(), ClientError> {
    match command {
        Commands::Submit {
            task_type,
            target,
            params,
            id,
            remote,
            remote_only,
            max_queue_minutes,
            max_runtime_minutes,
            email_alert,
        } => {
            let parameters = serde_json::from_str(&params)
                .map_err(|e| ClientError::InvalidArgument(format!("--params: {e}")))?;
            let request = SubmitRequest {
                task_type,
                task_id: id,
                target,
                parameters,
                remote,
                remote_only,
                max_queue_minutes,
                max_runtime_minutes,
                email_alert,
            };
            let task_id = client.submit(&request).await?;
            println!("{task_id}");
        }
        Commands::Status { id } => {
            print_task(&client.task(&id).await?);
        }
        Commands::Progress { id, offset, follow } => {
            follow_progress(client, &id, offset, follow).await?;
        }
        Commands::Result { id } => {
            print_outcome(&client.result(&id).await?);
        }
        Commands::Cancel { id } => {
            if client.cancel(&id).await? {
                println!("Task {id} cancelled");
            } else {
                println!("Task {id} was not cancelled (already finished or not yours)");
            }
        }
        Commands::EmailAlert { id } => {
            client.add_email_alert(&id).await?;
            println!("Completion notice requested for {id}");
        }
        Commands::List => {
            let tasks = client.tasks().await?;
            println!("Tasks ({}):", tasks.len());
            println!(
                "{:<36}  {:<10}  {:<16}  {:<12}  {}",
                "ID", "STATE", "TYPE", "SUBMITTER", "SUBMITTED"
            );
            println!("{}", "-".repeat(96));
            for task in tasks {
                println!(
                    "{:<36}  {:<10}  {:<16}  {:<12}  {}",
                    task.task_id,
                    task.state,
                    task.task_type,
                    task.submitter,
                    format_time(task.submitted_at)
                );
            }
        }
        Commands::Workers => {
            let workers = client.workers().await?;
            println!("Workers ({}):", workers.len());
            println!(
                "{:<36}  {:<10}  {:<8}  {:<20}  {}",
                "ID", "STATUS", "TASKS", "HOST", "TASK TYPES"
            );
            println!("{}", "-".repeat(96));
            for worker in workers {
                let tasks = format!("{}/{}", worker.active_tasks, worker.max_concurrent);
                println!(
                    "{:<36}  {:<10}  {:<8}  {:<20}  {}",
                    worker.worker_id,
                    format!("{:?}", worker.status).to_uppercase(),
                    tasks,
                    worker.hostname,
                    worker.task_types.join(", ")
                );
                println!("    last heartbeat {}", format_time(Some(worker.last_heartbeat)));
            }
        }
        Commands::Health => {
            let health = client.health().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&health).unwrap_or_else(|_| health.to_string())
            );
        }
    }

    Ok(())
}

async fn follow_progress(
    client: &HttpClient,
    id: &str,
    mut offset: usize,
    follow: bool,
) -> Result<(), ClientError> {
    loop {
        let page = client.progress(id, offset).await?;
        for entry in &page.entries {
            print_entry(entry);
        }
        offset = page.next_offset;
        if !follow || page.state.is_terminal() {
            if follow {
                println!("Task ended: {}", page.state);
            }
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn print_task(task: &TaskSummary) {
    println!("  ID:         {}", task.task_id);
    println!("  Type:       {}", task.task_type);
    if let Some(target) = &task.target {
        println!("  Target:     {target}");
    }
    println!("  Submitter:  {}", task.submitter);
    println!("  State:      {}", task.state);
    println!("  Submitted:  {}", format_time(task.submitted_at));
    println!("  Started:    {}", format_time(task.started_at));
    println!("  Finished:   {}", format_time(task.finished_at));
    if let Some(worker) = &task.worker_id {
        println!("  Worker:     {worker}");
    }
    println!("  Progress:   {} entries", task.progress_entries);
    println!("  Email:      {}", if task.email_alert { "yes" } else { "no" });
}

fn print_outcome(outcome: &TaskOutcome) {
    println!("  ID:         {}", outcome.task_id);
    println!("  State:      {}", outcome.state);
    println!("  Finished:   {}", format_time(Some(outcome.finished_at)));
    println!("  Remote:     {}", if outcome.ran_remotely { "yes" } else { "no" });
    if let Some(failure) = &outcome.failure {
        println!("  Failure:    [{}] {}", failure.kind, failure.message);
    }
    if outcome.state == TaskState::Finished {
        let answer = outcome.answer.clone().unwrap_or(serde_json::Value::Null);
        println!(
            "{}",
            serde_json::to_string_pretty(&answer).unwrap_or_else(|_| answer.to_string())
        );
    }
}

fn print_entry(entry: &ProgressEntry) {
    let marker = if entry.done { " (done)" } else { "" };
    println!(
        "{}  {:>3}%  {}{}",
        entry.timestamp.format("%H:%M:%S"),
        entry.percent,
        entry.message,
        marker
    );
}

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
