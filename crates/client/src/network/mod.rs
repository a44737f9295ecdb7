//! Network module for peer connections.
//!
//! This module provides:
//! - The WebSocket connection to the rendezvous service
//! - WebRTC peer connections carrying the files data channel

pub mod signaling;
pub mod webrtc;

pub use signaling::{SignalingClient, SignalingConfig};
pub use webrtc::{
    IceServer, TransportEvent, WebRtcChannel, WebRtcConfig, WebRtcTransport, FILES_CHANNEL_LABEL,
};
