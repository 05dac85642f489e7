//! Puzzle gate client: requests a puzzle, solves it and prints the granted
//! resource.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use pow_gate::config::GateConfig;
use pow_gate::protocol::Client;
use pow_gate::transport::connect;
use pow_gate::utils::logging::init_logging;
use pow_gate::Result;

#[derive(Parser, Debug)]
#[command(name = "pow-gate-client", version, about = "Hashcash proof-of-work gate client")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server address (overrides config file and environment)
    #[arg(short, long)]
    address: Option<String>,

    /// Number of resources to request, one connection each
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let mut failures = 0u32;
    for round in 1..=args.count {
        match fetch(&config).await {
            Ok(resource) => {
                info!(round, "Resource granted");
                println!("{resource}");
            }
            Err(e) => {
                error!(round, error = %e, kind = ?e.kind(), "Request failed");
                failures += 1;
            }
        }
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn fetch(config: &GateConfig) -> Result<String> {
    let stream = connect(&config.client.address, config.client.connection_timeout).await?;
    let client_id = stream.local_addr()?.to_string();

    Client::new(config.clone())
        .with_response_timeout(config.client.response_timeout)
        .request_resource(&client_id, stream)
        .await
}

fn load_config(args: &Args) -> Result<GateConfig> {
    let mut config = match &args.config {
        Some(path) => GateConfig::from_file(path)?,
        None => GateConfig::default(),
    };
    config.apply_env()?;

    if let Some(address) = &args.address {
        config.client.address = address.clone();
    }

    config.validate_client_strict()?;
    Ok(config)
}
