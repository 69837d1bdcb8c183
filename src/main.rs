// src/main.rs
//! Troupe
//!
//! Control surface for agent workers and content generators. `start`,
//! `suspend` and `stop` go through the orchestrator; `worker` and
//! `generate` run the long-lived loops.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use troupe_engine::generation::{GeneratorDriver, GeneratorMerger, GeneratorRegistry};
use troupe_engine::observability::{init_metrics, init_tracing};
use troupe_engine::queue::{comment_lane, NeedBus, SqliteQueue, WorkQueue};
use troupe_engine::recording::{ActionSink, SqliteActionLog};
use troupe_engine::runtime::{
    AgentWorker, DryRunExecutor, ProcessManager, ProcessOrchestrator, StartOutcome,
    WorkerCommand, WorkerControl,
};
use troupe_engine::state::{generator_key, SqliteStateStore, StateStore};
use troupe_engine::utils::config::EngineConfig;
use troupe_engine::utils::random::RandomSource;

#[derive(Parser)]
#[command(name = "troupe", version, about = "Run and control autonomous agents")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "TROUPE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an agent worker, or resume a suspended one
    Start { agent: String },

    /// Suspend an agent for the configured TTL
    Suspend { agent: String },

    /// Stop an agent and kill its worker
    Stop { agent: String },

    /// Show agent states; all configured agents when none is given
    State { agent: Option<String> },

    /// Per-category action counts of an agent
    Stats { agent: String },

    /// Queued work of a topic, oldest first
    Queue { topic: String },

    /// Most recent actions of an agent, newest first
    Actions {
        agent: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Run an agent's action loop in this process
    Worker { agent: String },

    /// Run the content generators of a topic
    Generate {
        topic: String,

        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.observability)?;

    let config = Arc::new(config);
    let state_path = config.storage.state_path();
    let store: Arc<dyn StateStore> = match &cli.command {
        // an unreachable store shows every agent as stopped
        Command::State { .. } => SqliteStateStore::open_or_unreachable(&state_path),
        _ => Arc::new(SqliteStateStore::open(&state_path).context("Failed to open state store")?),
    };

    match cli.command {
        Command::Start { agent } => {
            let orchestrator = orchestrator(&cli.config, store, config);
            match orchestrator.start(&agent).await? {
                StartOutcome::Started(pid) => println!("{} started (pid {})", agent, pid),
                StartOutcome::AlreadyRunning(pid) => println!("{} already running (pid {})", agent, pid),
                StartOutcome::Resumed(pid) => println!("{} resumed (pid {})", agent, pid),
            }
        }
        Command::Suspend { agent } => {
            orchestrator(&cli.config, store, config).suspend(&agent).await?;
            println!("{} suspended", agent);
        }
        Command::Stop { agent } => {
            orchestrator(&cli.config, store, config).stop(&agent).await?;
            println!("{} stopped", agent);
        }
        Command::State { agent } => {
            let orchestrator = orchestrator(&cli.config, store.clone(), config.clone());
            let mut agents: Vec<String> = match agent {
                Some(agent) => vec![agent],
                None => config.agents.keys().cloned().collect(),
            };
            agents.sort();

            for agent in agents {
                let pid = orchestrator
                    .live_worker(&agent)
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<20} {:<8} {}", agent, orchestrator.get_state(&agent), pid);
            }
            // an absent generator key means the driver is free to run
            for topic in config.topics.keys() {
                let state = store
                    .get(&generator_key(topic))
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<20} {:<8} generator", topic, state);
            }
        }
        Command::Stats { agent } => {
            let log = SqliteActionLog::open(&config.storage.log_path())?;
            println!("{}", serde_json::to_string_pretty(&log.stats(&agent)?)?);
        }
        Command::Queue { topic } => {
            let queue = shared_queue(&config, store)?;
            for lane in [topic.clone(), comment_lane(&topic)] {
                if queue.is_empty(&lane)? {
                    println!("{:<24} empty", lane);
                    continue;
                }
                println!("{:<24} {} queued", lane, queue.len(&lane)?);
                for item in queue.snapshot(&lane)? {
                    println!("  {}", serde_json::to_string(&item)?);
                }
            }
        }
        Command::Actions { agent, limit } => {
            let log = SqliteActionLog::open(&config.storage.log_path())?;
            for record in log.recent(&agent, limit)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Worker { agent } => run_worker(&agent, store, config).await?,
        Command::Generate { topic, once } => run_generator(&topic, once, store, config).await?,
    }

    Ok(())
}

/// Orchestrator whose workers load the same configuration file
fn orchestrator(
    config_path: &Option<PathBuf>,
    store: Arc<dyn StateStore>,
    config: Arc<EngineConfig>,
) -> ProcessOrchestrator {
    let mut command = WorkerCommand::from(&config.worker);
    if let Some(path) = config_path {
        command
            .env_vars
            .push(("TROUPE_CONFIG".to_string(), path.display().to_string()));
    }
    ProcessOrchestrator::new(store, ProcessManager::new(command), config)
}

/// Queue shared with other processes; needs travel through the state store
fn shared_queue(config: &EngineConfig, store: Arc<dyn StateStore>) -> Result<WorkQueue> {
    let backend = SqliteQueue::open(&config.storage.queue_path()).context("Failed to open work queue")?;
    let needs = NeedBus::shared(store, config.generator.need_ttl());
    Ok(WorkQueue::new(Arc::new(backend), needs))
}

/// Cancel the token on ctrl-c or SIGTERM
fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received ctrl-c, shutting down"),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
        }
        token.cancel();
    });
    Ok(())
}

async fn run_worker(agent: &str, store: Arc<dyn StateStore>, config: Arc<EngineConfig>) -> Result<()> {
    init_metrics(config.observability.metrics_addr.as_deref())?;

    let token = CancellationToken::new();
    cancel_on_signal(token.clone())?;

    let sink = Arc::new(SqliteActionLog::open(&config.storage.log_path())?);
    let queue = shared_queue(&config, store.clone())?;
    let control = WorkerControl::new(agent, store, &config.worker, token);
    let worker = AgentWorker::new(
        agent,
        &config,
        queue,
        Arc::new(DryRunExecutor::default()),
        sink,
        control,
        RandomSource::from_entropy(),
    )?;

    match worker.run().await {
        Ok(count) => {
            info!("Worker for {} done after {} actions", agent, count);
            Ok(())
        }
        Err(e) => {
            error!("Worker for {} failed: {}", agent, e);
            Err(e.into())
        }
    }
}

async fn run_generator(
    topic: &str,
    once: bool,
    store: Arc<dyn StateStore>,
    config: Arc<EngineConfig>,
) -> Result<()> {
    let queue = shared_queue(&config, store.clone())?;
    let mut rng = RandomSource::from_entropy();
    let merger = GeneratorMerger::new(
        Arc::new(GeneratorRegistry::with_builtins()),
        config.clone(),
        queue.clone(),
        rng.fork(),
    );
    let mut driver = GeneratorDriver::new(merger, queue, store, &config.generator, rng);

    if once {
        let enqueued = driver.run_once(topic)?;
        println!("{} items queued for {}", enqueued, topic);
        return Ok(());
    }

    init_metrics(config.observability.metrics_addr.as_deref())?;
    let token = CancellationToken::new();
    cancel_on_signal(token.clone())?;
    driver.run(topic, token).await?;
    Ok(())
}
