//! # PeerDrop Protocol Library
//!
//! Wire definitions shared by the rendezvous server and the transfer client.
//!
//! ## Overview
//!
//! - **Signaling**: JSON messages exchanged with the rendezvous service to
//!   create rooms, join them and relay connection negotiation payloads
//! - **Framing**: JSON control messages and identifier-prefixed binary data
//!   frames carried over the direct peer channel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Transfer framing (file-start,      │  JSON control + binary data
//! │      data frames, file-end)             │
//! ├─────────────────────────────────────────┤
//! │      Ordered reliable data channel      │  WebRTC
//! └─────────────────────────────────────────┘
//!               ▲ negotiated via
//! ┌─────────────────────────────────────────┐
//! │      Signaling (rooms + relay)          │  JSON over WebSocket
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, ControlMessage, DataFrame, FileId, FileMetadata};
//!
//! let join = ClientMessage::JoinRoom { room_id: "abc234".into() };
//! assert!(join.to_json().unwrap().contains("join-room"));
//!
//! let file_id = FileId::generate();
//! let start = ControlMessage::file_start(file_id, &FileMetadata::new("a.txt", 3, "text/plain"));
//! let frame = DataFrame::new(file_id, b"abc".to_vec()).encode();
//! assert_eq!(frame.len(), 16 + 3);
//! assert!(start.encode().unwrap().contains("file-start"));
//! ```
//!
//! ## Modules
//!
//! - [`signaling`]: Rendezvous messages and identifiers
//! - [`framing`]: Transfer control messages and data frames
//! - [`error`]: Error types

pub mod error;
pub mod framing;
pub mod signaling;

pub use error::{ProtocolError, Result};
pub use framing::{
    chunk_count, ChannelMessage, ControlMessage, DataFrame, FileId, FileMetadata, CHUNK_SIZE,
    DEFAULT_MIME_TYPE, FILE_ID_LEN, HIGH_WATER_MARK,
};
pub use signaling::{
    ClientMessage, IceCandidate, NegotiationPayload, PeerId, RelayRequest, RoomCode, SdpType,
    ServerMessage, SessionDescription, ROOM_CODE_ALPHABET, ROOM_CODE_LENGTH,
};
