//! # PeerDrop Rendezvous Server
//!
//! Lets peers find each other by short room codes and relays their connection
//! negotiation messages. File bytes never pass through this service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   SignalingServer                       │
//! │  TCP accept ─┬─ GET /health ──► health report           │
//! │              └─ WebSocket ────► connection task         │
//! ├─────────────────────────────────────────────────────────┤
//! │  ServerState                                            │
//! │  ┌──────────────────────┐   ┌────────────────────────┐  │
//! │  │ Registry (one lock)  │──►│ connection table       │  │
//! │  │ peers, rooms, relay  │   │ peer id → outbound tx  │  │
//! │  └──────────────────────┘   └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use server::{Config, SignalingServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let server = SignalingServer::bind(&config).await?;
//!     server.run(CancellationToken::new()).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: Room and peer registry
//! - [`server`]: WebSocket service and connection table
//! - [`health`]: Health check endpoint and client
//! - [`config`]: Configuration loading and defaults

pub mod config;
pub mod health;
pub mod registry;
pub mod server;

// Re-export protocol for convenience
pub use protocol;

pub use config::{Config, ConfigError};
pub use health::HealthReport;
pub use registry::{Outbound, Registry, RegistryError};
pub use server::{ServerState, SignalingServer};
