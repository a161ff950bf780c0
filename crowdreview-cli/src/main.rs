use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crowdreview_core::{Actor, Role, UserId};
use crowdreview_engine::{Config, Engine, NoopNotifier, SqliteRepository};
use tracing::{info, Level};
use uuid::Uuid;

/// Crowdreview: operator tooling for the task distribution engine
#[derive(Parser, Debug)]
#[command(name = "crowdreview")]
#[command(about = "Operate the crowdreview assignment engine", long_about = None)]
struct Cli {
    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every registered account
    Workers,
    /// Register a new account
    RegisterWorker(RegisterArgs),
    /// Approve a tester or reviewer so they can receive work
    ApproveWorker(WorkerArgs),
    /// Turn a worker's green light on, off, or flip it
    Availability(AvailabilityArgs),
    /// Move a worker to another role, releasing work the new role cannot hold
    SwitchRole(SwitchRoleArgs),
    /// Delete a worker and return their open tasks to the queue
    DeleteWorker(WorkerArgs),
    /// Assign every queued task to the least-loaded available worker
    AssignQueued,
    /// Rebalance open submissions across available reviewers
    Redistribute,
    /// Show a worker's open tasks
    Workload(WorkerArgs),
    /// Show the most recent activity, newest first
    Activity(ActivityArgs),
}

#[derive(Parser, Debug)]
struct RegisterArgs {
    /// Display name
    name: String,

    /// Account role
    #[arg(long, default_value = "reviewer", value_parser = ["admin", "reviewer", "tester", "contributor"])]
    role: String,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Worker id
    id: Uuid,
}

#[derive(Parser, Debug)]
struct SwitchRoleArgs {
    /// Worker id
    id: Uuid,

    /// New role
    #[arg(long, value_parser = ["admin", "reviewer", "tester", "contributor"])]
    role: String,
}

#[derive(Parser, Debug)]
struct AvailabilityArgs {
    /// Worker id
    id: Uuid,

    /// Desired state; flips the current state if omitted
    #[arg(long, value_parser = ["on", "off"])]
    set: Option<String>,
}

#[derive(Parser, Debug)]
struct ActivityArgs {
    /// Number of events to show
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let db_path = config.database_path();
    info!("Using database at {:?}", db_path);
    let store = SqliteRepository::new(&db_path)
        .with_context(|| format!("Failed to open database at {:?}", db_path))?;
    let engine = Engine::with_store(Arc::new(store), Arc::new(NoopNotifier), config.engine);

    // The CLI acts with operator authority.
    let operator = Actor::System;

    match cli.command {
        Commands::Workers => {
            for worker in engine.list_workers().await? {
                println!(
                    "{}  {:<12} {:<24} eligible={} available={}",
                    worker.id,
                    worker.role.as_str(),
                    worker.name,
                    worker.eligible,
                    worker.available
                );
            }
        }
        Commands::RegisterWorker(args) => {
            let role: Role = args.role.parse().map_err(anyhow::Error::msg)?;
            let worker = engine.register_worker(&args.name, role).await?;
            println!("{}", worker.id);
        }
        Commands::ApproveWorker(args) => {
            let worker = engine
                .approve_worker(UserId::from(args.id), operator)
                .await?;
            println!("Approved {} ({})", worker.name, worker.role);
        }
        Commands::Availability(args) => {
            let id = UserId::from(args.id);
            let change = match args.set.as_deref() {
                Some("on") => engine.set_availability(id, true).await?,
                Some("off") => engine.set_availability(id, false).await?,
                _ => engine.toggle_availability(id).await?,
            };
            println!(
                "{} is {} ({} tasks redistributed)",
                change.worker.name,
                if change.worker.available { "available" } else { "unavailable" },
                change.tasks_redistributed
            );
        }
        Commands::SwitchRole(args) => {
            let role: Role = args.role.parse().map_err(anyhow::Error::msg)?;
            let worker = engine
                .switch_role(UserId::from(args.id), role, operator)
                .await?;
            println!(
                "{} is now {} (eligible={})",
                worker.name, worker.role, worker.eligible
            );
        }
        Commands::DeleteWorker(args) => {
            engine
                .delete_worker(UserId::from(args.id), operator)
                .await?;
            println!("Deleted {}", args.id);
        }
        Commands::AssignQueued => {
            let assigned = engine.assign_queued().await?;
            println!("Assigned {} queued tasks", assigned);
        }
        Commands::Redistribute => {
            let placed = engine.redistribute_all().await?;
            println!("Redistributed {} open submissions", placed);
        }
        Commands::Workload(args) => {
            let workload = engine.workload(UserId::from(args.id)).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&workload).context("Failed to render workload")?
            );
        }
        Commands::Activity(args) => {
            for event in engine.recent_activity(args.limit).await? {
                println!(
                    "{}  {:<20} {:<10} {}",
                    event.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    event.action.as_str(),
                    event.actor.role_name(),
                    event.description
                );
            }
        }
    }

    Ok(())
}
