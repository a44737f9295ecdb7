//! Transfer framing over an open peer channel.
//!
//! Two message classes share one channel:
//!
//! - **Control** messages are JSON text with a `type` of `file-start` or
//!   `file-end`.
//! - **Data** messages are binary: a fixed-width session identifier followed
//!   immediately by raw file bytes.
//!
//! # Data Frame Format
//!
//! ```text
//! ┌────────────────────────┬──────────────────────────┐
//! │ File ID (16B, UUID)    │ Payload (≤ chunk size)   │
//! └────────────────────────┴──────────────────────────┘
//! ```
//!
//! The file identifier multiplexes any number of sequential or concurrent
//! transfers sharing a channel. A single transfer is simply the case of one
//! identifier.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};

/// Default size of a file slice carried by one data frame (16 KiB).
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Width of the session-identifier prefix on data frames.
pub const FILE_ID_LEN: usize = 16;

/// Default pending-send threshold above which a sender pauses (16 MiB).
pub const HIGH_WATER_MARK: usize = 16 * 1024 * 1024;

/// Media type used when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Identifier of one file transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Generates a fresh random file identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Builds an identifier from its 16-byte wire form.
    pub fn from_bytes(bytes: [u8; FILE_ID_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the 16-byte wire form.
    pub fn as_bytes(&self) -> &[u8; FILE_ID_LEN] {
        self.0.as_bytes()
    }

    /// Parses the hyphenated text form.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self(Uuid::parse_str(text)?))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Metadata announced before a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// File name (no directory components).
    pub name: String,
    /// Exact byte length of the file.
    pub size: u64,
    /// Media type of the content.
    pub mime_type: String,
    /// Optional human-readable description of the content.
    pub description: Option<String>,
}

impl FileMetadata {
    /// Creates metadata without a description.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            description: None,
        }
    }

    /// Attaches a description.
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// Control messages exchanged as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Announces a new file and opens its session.
    FileStart {
        #[serde(rename = "fileId")]
        file_id: FileId,
        name: String,
        size: u64,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Marks the end of a file's bytes.
    FileEnd {
        #[serde(rename = "fileId")]
        file_id: FileId,
    },
}

impl ControlMessage {
    /// Builds a `file-start` message from metadata.
    pub fn file_start(file_id: FileId, metadata: &FileMetadata) -> Self {
        ControlMessage::FileStart {
            file_id,
            name: metadata.name.clone(),
            size: metadata.size,
            mime_type: metadata.mime_type.clone(),
            description: metadata.description.clone(),
        }
    }

    /// Builds a `file-end` message.
    pub fn file_end(file_id: FileId) -> Self {
        ControlMessage::FileEnd { file_id }
    }

    /// Returns the session identifier this message refers to.
    pub fn file_id(&self) -> FileId {
        match self {
            ControlMessage::FileStart { file_id, .. } | ControlMessage::FileEnd { file_id } => {
                *file_id
            }
        }
    }

    /// Extracts the metadata of a `file-start` message.
    pub fn metadata(&self) -> Option<FileMetadata> {
        match self {
            ControlMessage::FileStart {
                name,
                size,
                mime_type,
                description,
                ..
            } => Some(FileMetadata {
                name: name.clone(),
                size: *size,
                mime_type: mime_type.clone(),
                description: description.clone(),
            }),
            ControlMessage::FileEnd { .. } => None,
        }
    }

    /// Encodes the message as JSON text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message from JSON text.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A slice of file bytes tagged with its session identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Session the bytes belong to.
    pub file_id: FileId,
    /// Raw file bytes.
    pub payload: Bytes,
}

impl DataFrame {
    /// Creates a new data frame.
    pub fn new(file_id: FileId, payload: impl Into<Bytes>) -> Self {
        Self {
            file_id,
            payload: payload.into(),
        }
    }

    /// Total size of the frame on the wire.
    pub fn wire_size(&self) -> usize {
        FILE_ID_LEN + self.payload.len()
    }

    /// Encodes the frame: identifier prefix followed by the payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_slice(self.file_id.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a frame without copying the payload.
    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.len() < FILE_ID_LEN {
            return Err(ProtocolError::FrameTooShort {
                len: data.len(),
                min: FILE_ID_LEN,
            });
        }

        let prefix = data.split_to(FILE_ID_LEN);
        let mut id = [0u8; FILE_ID_LEN];
        id.copy_from_slice(&prefix);

        Ok(Self {
            file_id: FileId::from_bytes(id),
            payload: data,
        })
    }
}

/// Any message received on a transfer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Control(ControlMessage),
    Data(DataFrame),
}

impl ChannelMessage {
    /// Decodes a text message.
    pub fn from_text(text: &str) -> Result<Self> {
        ControlMessage::decode(text).map(ChannelMessage::Control)
    }

    /// Decodes a binary message.
    pub fn from_binary(data: Bytes) -> Result<Self> {
        DataFrame::decode(data).map(ChannelMessage::Data)
    }
}

/// Number of data frames needed for a file of `size` bytes.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size as u64)
}
