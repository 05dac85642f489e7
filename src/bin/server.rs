//! Puzzle gate server: issues hashcash puzzles and grants a quote to every
//! client that returns a valid solution.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use pow_gate::config::GateConfig;
use pow_gate::protocol::{PuzzleRegistry, ServerHandler};
use pow_gate::transport::TcpServer;
use pow_gate::utils::logging::init_logging;
use pow_gate::utils::QuoteBook;
use pow_gate::Result;

#[derive(Parser, Debug)]
#[command(name = "pow-gate-server", version, about = "Hashcash proof-of-work gate server")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file and environment)
    #[arg(short, long)]
    address: Option<String>,

    /// Leading zero hex digits required of every solution
    #[arg(short, long)]
    difficulty: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.logging)?;

    let handler = Arc::new(ServerHandler::new(
        config.clone(),
        Arc::new(PuzzleRegistry::new()),
        QuoteBook::default(),
    ));

    let server = TcpServer::listen(&config, handler).await?;
    info!(
        address = %server.local_addr(),
        difficulty = config.puzzle.difficulty,
        "Server started"
    );

    shutdown_signal().await;
    server.shutdown().await;
    Ok(())
}

fn load_config(args: &Args) -> Result<GateConfig> {
    let mut config = match &args.config {
        Some(path) => GateConfig::from_file(path)?,
        None => GateConfig::default(),
    };
    config.apply_env()?;

    if let Some(address) = &args.address {
        config.server.address = address.clone();
    }
    if let Some(difficulty) = args.difficulty {
        config.puzzle.difficulty = difficulty;
    }

    config.validate_strict()?;
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
