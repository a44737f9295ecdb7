//! # PeerDrop Client
//!
//! Sends files directly to another peer. The rendezvous service is only used
//! to find the peer and exchange connection negotiation messages; file bytes
//! travel over a WebRTC data channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      orchestrator                        │
//! │   send_files / receive_files                             │
//! ├──────────────┬──────────────────────┬────────────────────┤
//! │ network      │ negotiation          │ transfer           │
//! │ signaling ◄──┤ Coordinator          │ FileSender         │
//! │ webrtc    ◄──┤ (offer/answer/ICE)   │ FileReceiver       │
//! └──────────────┴──────────────────────┴────────┬───────────┘
//!                                                │
//!                                  channel::DataChannel
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: Data channel abstraction and in-memory pair
//! - [`negotiation`]: Peer negotiation state machine
//! - [`network`]: Rendezvous connection and WebRTC transport
//! - [`transfer`]: Chunked transfer session manager
//! - [`summarize`]: Optional file descriptions
//! - [`orchestrator`]: Send and receive flows
//! - [`config`]: Configuration loading and defaults

pub mod channel;
pub mod config;
pub mod negotiation;
pub mod network;
pub mod orchestrator;
pub mod summarize;
pub mod transfer;

// Re-export protocol for convenience
pub use protocol;

pub use channel::{memory_pair, ChannelEvent, ChannelPayload, ChannelReceiver, DataChannel};
pub use config::{Config, ConfigError};
pub use negotiation::{Coordinator, NegotiationEvent, NegotiationState, Role};
pub use orchestrator::{receive_files, send_files, FlowEvent};
pub use transfer::{FileReceiver, FileSender, TransferEvent, TransferStatus};
