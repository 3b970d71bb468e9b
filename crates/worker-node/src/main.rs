mod challenge;
mod handlers;
mod session;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use worker_core::{NodeConfig, RamReservation};
use worker_engine::VectorEngine;

use crate::session::Node;
use crate::shutdown::Shutdown;

#[derive(Parser)]
#[command(name = "worker-node", about = "Distributed vector-search worker node")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, env = "WORKER_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, env = "WORKER_LOG_JSON", default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the coordinator and serve requests (default).
    Run,
    /// Report on-disk state without starting a session.
    Status,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = NodeConfig::load(&cli.config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Status => run_status(config),
        Command::Run => run_node(config).await,
    }
}

fn run_status(config: NodeConfig) {
    let engine = VectorEngine::new(PathBuf::from(&config.data_dir), config.embedding_dim, config.max_ram_gb);
    engine.load_all();

    let collections = engine.collection_count();
    let vectors = engine.get_total_vectors();
    let bytes_used = engine.get_bytes_used();
    let capacity_bytes = config.max_ram_gb * (1 << 30);
    let pct = if capacity_bytes == 0 {
        0.0
    } else {
        (bytes_used as f64 / capacity_bytes as f64) * 100.0
    };

    println!("node_id:        {}", config.node_id);
    println!("data_dir:       {}", config.data_dir);
    println!("collections:    {collections}");
    println!("vectors_stored: {vectors}");
    println!("bytes_used:     {bytes_used}");
    println!("capacity_bytes: {capacity_bytes}");
    println!("capacity_used:  {pct:.2}%");
}

async fn run_node(config: NodeConfig) {
    if let Err(err) = config.validate() {
        error!(error = %err, "invalid configuration");
        std::process::exit(1);
    }

    let ram = match RamReservation::commit(config.max_ram_gb) {
        Ok(ram) => ram,
        Err(err) => {
            error!(error = %err, "failed to commit RAM reservation");
            std::process::exit(1);
        }
    };
    info!(gib = ram.gib(), "committed RAM reservation");

    let engine = Arc::new(VectorEngine::new(
        PathBuf::from(&config.data_dir),
        config.embedding_dim,
        config.max_ram_gb,
    ));
    engine.load_all();

    let shutdown = Shutdown::new();
    tokio::spawn(watch_signals(Arc::clone(&shutdown)));

    let node = Node {
        config,
        engine: Arc::clone(&engine),
        shutdown,
    };
    session::run(node).await;

    // `run_registered_session` already checkpoints on its own way out, but a
    // shutdown signal that arrives while offline/backing off never enters a
    // session at all. Save unconditionally here so graceful shutdown always
    // means "checkpointed then exited", regardless of connection state.
    engine.save_all().await;
    info!("shutdown complete, exiting");
}

async fn watch_signals(shutdown: Arc<Shutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    shutdown.signal();
}
