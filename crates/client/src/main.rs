//! PeerDrop Client
//!
//! Command-line sender and receiver for peer-to-peer file sharing.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use client::config::Config;
use client::orchestrator::{receive_files, send_files, FlowEvent};
use client::protocol::FileId;
use client::transfer::{format_bytes, format_rate, TransferEvent};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// PeerDrop peer-to-peer file sharing.
#[derive(Parser, Debug)]
#[command(name = "peerdrop")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Rendezvous service URL (overrides config)
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a room and send files to whoever joins it
    Send {
        /// Files to send, in order
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Join a room and save the files it sends
    Receive {
        /// Room code shown by the sender
        code: String,

        /// Directory for received files (overrides config)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Renders flow events as progress bars.
struct ProgressDisplay {
    mp: MultiProgress,
    bars: HashMap<FileId, (ProgressBar, String)>,
}

impl ProgressDisplay {
    fn new() -> Self {
        Self {
            mp: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {prefix}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
    }

    fn println(&self, line: String) {
        let _ = self.mp.println(line);
    }

    fn handle(&mut self, event: FlowEvent) {
        match event {
            FlowEvent::RoomCreated(code) => {
                self.println(format!("Room code: {}", code));
                self.println(format!("On the receiving side run: peerdrop receive {}", code));
            }
            FlowEvent::RoomJoined(code) => {
                self.println(format!("Joined room {}, waiting for sender", code));
            }
            FlowEvent::PeerConnected(peer) => {
                self.println(format!("Connected to peer {}", peer));
            }
            FlowEvent::Saved { name, path } => {
                self.println(format!("Saved {} to {}", name, path.display()));
            }
            FlowEvent::Transfer(event) => self.handle_transfer(event),
        }
    }

    fn handle_transfer(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Started {
                file_id, metadata, ..
            } => {
                let pb = self.mp.add(ProgressBar::new(metadata.size));
                pb.set_style(Self::bar_style());
                pb.set_message(metadata.name.clone());
                if let Some(description) = &metadata.description {
                    self.println(format!("{}: {}", metadata.name, description));
                }
                self.bars.insert(file_id, (pb, metadata.name));
            }
            TransferEvent::Progress {
                file_id, progress, ..
            } => {
                if let Some((pb, _)) = self.bars.get(&file_id) {
                    pb.set_position(progress.transferred);
                    pb.set_prefix(format_rate(progress.bytes_per_sec));
                }
            }
            TransferEvent::Completed { file_id, bytes, .. } => {
                if let Some((pb, name)) = self.bars.remove(&file_id) {
                    pb.set_position(bytes);
                    pb.finish_with_message(format!("[DONE] {} ({})", name, format_bytes(bytes)));
                }
            }
            TransferEvent::Failed {
                file_id, reason, ..
            } => {
                if let Some((pb, name)) = self.bars.remove(&file_id) {
                    pb.abandon_with_message(format!("[FAILED] {}: {}", name, reason));
                }
            }
        }
    }
}

fn spawn_display() -> (mpsc::UnboundedSender<FlowEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut display = ProgressDisplay::new();
        while let Some(event) = rx.recv().await {
            display.handle(event);
        }
    });
    (tx, handle)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received interrupt, cancelling");
                signal_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt signal"),
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    if let Some(server) = cli.server {
        config.network.signaling_url = server;
    }

    init_tracing(&config.client.log_level, cli.verbose);

    match cli.command {
        Commands::Send { files } => {
            config.validate()?;
            let cancel = cancel_on_ctrl_c();
            let (events, display) = spawn_display();

            let result = send_files(&config, &files, events, cancel).await;
            let _ = display.await;

            let reports = result?;
            let total: u64 = reports.iter().map(|r| r.bytes_sent).sum();
            println!("Sent {} file(s), {}", reports.len(), format_bytes(total));
        }
        Commands::Receive { code, output } => {
            if let Some(output) = output {
                config.transfer.download_dir = output;
            }
            config.validate()?;
            let cancel = cancel_on_ctrl_c();
            let (events, display) = spawn_display();

            let result = receive_files(
                &config,
                &code,
                &config.transfer.download_dir,
                events,
                cancel,
            )
            .await;
            let _ = display.await;

            let saved = result?;
            println!(
                "Received {} file(s) into {}",
                saved.len(),
                config.transfer.download_dir.display()
            );
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
