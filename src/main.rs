//! near-topology - Main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use near_topology::{
    cli::{Cli, Command, contract_helper_env_preview},
    config::{TopologyConfig, TopologySecrets},
    orchestrator::docker::{DockerOrchestrator, connect_docker},
    topology::assemble_topology,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("near_topology=info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    let mut config = TopologyConfig::resolve()?;

    match cli.command {
        Command::Up { debug, network } => {
            if debug {
                config.debug = true;
            }
            if let Some(network) = network {
                config.network = network;
            }
            let secrets = TopologySecrets::resolve()?;

            let orchestrator = DockerOrchestrator::connect(config.to_docker_config()).await?;
            tracing::info!(
                network = %config.network,
                run_id = %orchestrator.run_id(),
                debug = config.debug,
                "Assembling topology"
            );

            let descriptors = assemble_topology(&orchestrator, &config.to_plan(), &secrets).await?;
            println!("{}", serde_json::to_string_pretty(&descriptors)?);
        }
        Command::Down { network } => {
            let network = network.unwrap_or(config.network);
            let docker = connect_docker()?;
            let removed = DockerOrchestrator::teardown(&docker, &network).await?;
            println!("Removed {} container(s) and network '{}'", removed, network);
        }
        Command::Env => {
            for (key, value) in contract_helper_env_preview(&config.to_plan()) {
                println!("{}={}", key, value);
            }
        }
    }

    Ok(())
}
