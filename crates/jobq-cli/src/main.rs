//! `jobq`: enqueue and inspect jobs, run the worker pool, serve the
//! dashboard — all against the same `PgStorage`-backed queue.

mod dashboard;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobq_config::{Config, ConfigStore};
use jobq_core::{JobState, ManagerDefaults, NewJob, QueueManager};
use jobq_storage::PgStorage;
use jobq_worker::{WorkerPool, WorkerSettings};

#[derive(Parser)]
#[command(name = "jobq")]
#[command(about = "A single-node, persisted background job queue", long_about = None)]
struct Cli {
    /// Path to the config file (defaults to the user-scoped jobq config).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a job from a JSON object: {"id","command","priority","max_retries","run_at"}.
    Enqueue { json: String },

    /// List jobs, optionally filtered by state (pending/processing/completed/failed/dead).
    List {
        #[arg(long)]
        state: Option<String>,
    },

    /// Print counts per state.
    Status,

    /// Print event counts, mean duration, and the last N events.
    Metrics {
        #[arg(long, default_value_t = 10)]
        recent: i64,
    },

    /// Worker pool lifecycle.
    Worker {
        #[command(subcommand)]
        cmd: WorkerCmd,
    },

    /// Dead-letter queue inspection and recovery.
    Dlq {
        #[command(subcommand)]
        cmd: DlqCmd,
    },

    /// Read or write the config file.
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Serve the JSON dashboard.
    Dashboard {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

#[derive(Subcommand)]
enum WorkerCmd {
    /// Run the pool in the foreground until SIGINT/SIGTERM.
    Start {
        #[arg(long, default_value_t = 4)]
        count: u32,
    },
    /// Documented no-op: the pool lives inside its own `worker start`
    /// process, so stopping it means signalling that process directly.
    Stop,
    /// Print per-worker alive status and jobs_processed.
    ///
    /// Only meaningful from inside the same process as a running pool;
    /// this CLI process has no pool to report on, so it explains that
    /// instead of printing a fake empty table.
    Health,
}

#[derive(Subcommand)]
enum DlqCmd {
    List,
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigCmd {
    Get { key: Option<String> },
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_store = match &cli.config {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::at_default_path(),
    };

    if let Err(e) = run(cli, &config_store).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, config_store: &ConfigStore) -> Result<()> {
    let cmd = match cli.cmd {
        Commands::Config { cmd } => return run_config(config_store, cmd),
        other => other,
    };

    let config = config_store.load()?;
    let manager = Arc::new(connect(&config).await?);

    match cmd {
        Commands::Enqueue { json } => {
            let new_job: NewJob =
                serde_json::from_str(&json).context("enqueue argument must be a job JSON object")?;
            let job = manager.enqueue(new_job).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::List { state } => {
            let state = state.as_deref().map(parse_job_state).transpose()?;
            let jobs = manager.list(state).await?;
            for job in jobs {
                println!(
                    "{:<20} {:<10} pri={:<2} attempts={}/{} {}",
                    job.id,
                    format!("{:?}", job.state).to_lowercase(),
                    job.priority,
                    job.attempts,
                    job.max_retries,
                    job.command,
                );
            }
        }
        Commands::Status => {
            let stats = manager.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Metrics { recent } => {
            let summary = manager.metrics_summary(recent).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Worker { cmd } => run_worker(cmd, manager, &config).await?,
        Commands::Dlq { cmd } => run_dlq(cmd, manager).await?,
        Commands::Dashboard { addr } => {
            let socket_addr = addr.parse().context("invalid --addr")?;
            dashboard::serve(manager, socket_addr).await?;
        }
        Commands::Config { .. } => unreachable!("handled before connecting to storage"),
    }
    Ok(())
}

fn parse_job_state(s: &str) -> Result<JobState> {
    match s.to_ascii_lowercase().as_str() {
        "pending" => Ok(JobState::Pending),
        "processing" => Ok(JobState::Processing),
        "completed" => Ok(JobState::Completed),
        "failed" => Ok(JobState::Failed),
        "dead" => Ok(JobState::Dead),
        other => anyhow::bail!("unknown state: {other}"),
    }
}

async fn connect(config: &Config) -> Result<QueueManager<PgStorage>> {
    let database_url = config
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("no database_url in config and DATABASE_URL is unset")?;
    let storage = PgStorage::connect(&database_url).await?;
    let defaults = ManagerDefaults {
        max_retries: config.max_retries as i32,
    };
    Ok(QueueManager::new(Arc::new(storage), defaults))
}

async fn run_worker(cmd: WorkerCmd, manager: Arc<QueueManager<PgStorage>>, config: &Config) -> Result<()> {
    match cmd {
        WorkerCmd::Start { count } => {
            let settings = WorkerSettings {
                poll_interval: Duration::from_secs_f64(config.worker_poll_interval),
                job_timeout: Duration::from_secs(config.job_timeout),
                backoff_base: config.backoff_base,
            };
            let mut pool: WorkerPool<PgStorage, jobq_executor::Executor> = WorkerPool::new(manager, settings);
            pool.spawn(count);
            println!("worker pool running with {count} workers, press Ctrl-C to stop");
            wait_for_shutdown_signal().await?;
            pool.shutdown().await;
        }
        WorkerCmd::Stop => {
            println!(
                "jobq has no separate worker-supervisor process: send SIGTERM to the \
                 running `jobq worker start` process to stop it gracefully."
            );
        }
        WorkerCmd::Health => {
            println!(
                "worker health is only observable from inside a running `jobq worker start` \
                 process; this command has no pool to inspect."
            );
        }
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    Ok(())
}

async fn run_dlq(cmd: DlqCmd, manager: Arc<QueueManager<PgStorage>>) -> Result<()> {
    match cmd {
        DlqCmd::List => {
            let jobs = manager.list(Some(JobState::Dead)).await?;
            for job in jobs {
                println!("{} attempts={} error={:?}", job.id, job.attempts, job.error_message);
            }
        }
        DlqCmd::Retry { id } => {
            let job = manager.retry_dead(&id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }
    Ok(())
}

fn run_config(store: &ConfigStore, cmd: ConfigCmd) -> Result<()> {
    let mut config = store.load()?;
    match cmd {
        ConfigCmd::Get { key: Some(key) } => match config.get(&key) {
            Some(value) => println!("{value}"),
            None => anyhow::bail!("unknown config key: {key}"),
        },
        ConfigCmd::Get { key: None } => {
            for (key, value) in config.all() {
                println!("{key}={value}");
            }
        }
        ConfigCmd::Set { key, value } => {
            config.set(&key, &value)?;
            store.save(&config)?;
            println!("{key}={value}");
        }
    }
    Ok(())
}
