//! PeerDrop Rendezvous Server
//!
//! Room registry and signaling relay for peer-to-peer file sharing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use server::config::Config;
use server::health;
use server::SignalingServer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// PeerDrop rendezvous server.
#[derive(Parser, Debug)]
#[command(name = "peerdrop-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the rendezvous service
    Serve {
        /// Listen address (overrides config)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Query a running service's health endpoint
    Health {
        /// Service URL (ws://, wss://, http:// or https://)
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Request timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();

    init_tracing(&config.server.log_level, cli.verbose);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            config.validate()?;

            let server = SignalingServer::bind(&config).await?;
            tracing::info!(addr = %server.local_addr()?, "PeerDrop rendezvous server starting");

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("Received shutdown signal");
                        signal_token.cancel();
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
                }
            });

            server.run(shutdown).await?;
        }
        Commands::Health { url, timeout } => {
            let report = health::fetch(&url, Duration::from_secs(timeout)).await?;
            println!("Status:  {}", report.status);
            println!("Peers:   {}", report.peers);
            println!("Rooms:   {}", report.rooms);
            println!("Uptime:  {}s", report.uptime_secs);
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
