//! WolfCare - Multi-node record replication
//!
//! Runs a node: the local record store, the replication endpoint its peers
//! deliver to, and the dispatcher that pushes local writes out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfcare::api::HttpServer;
use wolfcare::config::WolfCareConfig;
use wolfcare::node::Node;

/// WolfCare - Multi-node record replication
#[derive(Parser)]
#[command(name = "wolfcare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfcare.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the config file's
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfCare node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfcare.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,

        /// Node number embedded in record identifiers; unique per node (0-1023)
        #[arg(long)]
        node_number: u16,
    },

    /// Validate configuration file
    Validate,

    /// Show a node's replication status
    Status {
        /// Node API base URL
        #[arg(short, long, default_value = "http://localhost:8080")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init { output, node_id, node_number } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_init(output, node_id, node_number)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_validate(cli.config)
        }
        Commands::Status { address } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            run_status(address).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the WolfCare node
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> anyhow::Result<()> {
    let config = WolfCareConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    init_logging(log_level.as_deref().unwrap_or(&config.logging.level));

    tracing::info!("Starting WolfCare node {}", config.node.id);
    tracing::info!("Data directory: {}", config.data_dir().display());

    let node = Arc::new(Node::from_config(&config).context("assembling node")?);

    let sweeper = config.replication.dedup_retention().map(|retention| {
        node.spawn_dedup_sweeper(
            retention,
            Duration::from_secs(config.replication.dedup_sweep_interval_secs.max(1)),
        )
    });

    let server = HttpServer::new(config.api.clone(), Arc::clone(&node));
    let result = server.start().await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("WolfCare node {} stopped", config.node.id);
    result.context("running HTTP API")
}

fn run_init(output: PathBuf, node_id: String, node_number: u16) -> anyhow::Result<()> {
    let sample = WolfCareConfig::sample(&node_id, node_number);
    WolfCareConfig::from_str(&sample).context("rendering configuration")?;
    std::fs::write(&output, sample)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nAdd the base URL of every other node to [replication].peers.");
    println!("Then start with: wolfcare --config {} start", output.display());
    Ok(())
}

fn run_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match WolfCareConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {} (number {})", config.node.id, config.node.number);
            println!("  API: {}", config.api.bind_address);
            println!("  Database: {}", config.database_path().display());
            println!("  Peers: {}", config.replication.peers.len());
            for peer in &config.replication.peers {
                println!("    - {}", peer);
            }
            println!("  Delivery attempts: {}", config.replication.max_attempts);
            if !config.replication.disabled_operations.is_empty() {
                println!("  Disabled operations: {}", config.replication.disabled_operations.join(", "));
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}

async fn run_status(address: String) -> anyhow::Result<()> {
    let url = format!("{}/status", address.trim_end_matches('/'));
    let status: serde_json::Value = reqwest::get(&url)
        .await
        .with_context(|| format!("contacting {}", url))?
        .error_for_status()?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
