//! Transfer session state shared by the sending and receiving sides.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use protocol::{FileId, FileMetadata, ProtocolError};
use thiserror::Error;
use tokio::sync::mpsc;

use super::progress::{ProgressSnapshot, ProgressTracker};

/// Which side of a transfer a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
}

/// Lifecycle status of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// Bytes are being sent.
    Sending,
    /// Bytes are being received.
    Receiving,
    /// All declared bytes moved.
    Complete,
    /// The session ended before all bytes moved.
    Failed,
    /// The session could not be started.
    Error,
}

impl TransferStatus {
    /// Whether the session has ended.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Complete | TransferStatus::Failed | TransferStatus::Error
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Sending => "sending",
            TransferStatus::Receiving => "receiving",
            TransferStatus::Complete => "complete",
            TransferStatus::Failed => "failed",
            TransferStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Errors that terminate a transfer session.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("channel closed before the transfer finished")]
    ChannelClosed,

    #[error("channel send failed: {0}")]
    Send(#[source] ProtocolError),

    #[error("malformed channel message: {0}")]
    Malformed(#[source] ProtocolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a sendable file: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("unknown session {0}")]
    UnknownSession(FileId),

    #[error("session {0} already exists")]
    DuplicateSession(FileId),

    #[error("session {file_id} received {received} bytes, more than the declared {declared}")]
    SizeExceeded {
        file_id: FileId,
        declared: u64,
        received: u64,
    },

    #[error("session {file_id} ended after {received} of {declared} bytes")]
    Incomplete {
        file_id: FileId,
        declared: u64,
        received: u64,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

/// Something that happened to a transfer session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Started {
        file_id: FileId,
        direction: Direction,
        metadata: FileMetadata,
    },
    Progress {
        file_id: FileId,
        direction: Direction,
        progress: ProgressSnapshot,
    },
    Completed {
        file_id: FileId,
        direction: Direction,
        bytes: u64,
    },
    Failed {
        file_id: FileId,
        direction: Direction,
        status: TransferStatus,
        reason: String,
    },
}

impl TransferEvent {
    /// Session the event refers to.
    pub fn file_id(&self) -> FileId {
        match self {
            TransferEvent::Started { file_id, .. }
            | TransferEvent::Progress { file_id, .. }
            | TransferEvent::Completed { file_id, .. }
            | TransferEvent::Failed { file_id, .. } => *file_id,
        }
    }
}

/// Optional destination for transfer events.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<mpsc::UnboundedSender<TransferEvent>>);

impl EventSink {
    /// Sink that forwards to `tx`.
    pub fn new(tx: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self(Some(tx))
    }

    /// Sink that discards everything.
    pub fn none() -> Self {
        Self(None)
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.0 {
            // Listener gone is not a transfer failure.
            let _ = tx.send(event);
        }
    }
}

/// One file's passage through one side of a channel.
#[derive(Debug)]
pub struct TransferSession {
    file_id: FileId,
    direction: Direction,
    metadata: FileMetadata,
    status: TransferStatus,
    progress: ProgressTracker,
}

impl TransferSession {
    /// Opens a session in the active state for its direction.
    pub fn new(
        file_id: FileId,
        direction: Direction,
        metadata: FileMetadata,
        progress_interval: Duration,
    ) -> Self {
        let status = match direction {
            Direction::Send => TransferStatus::Sending,
            Direction::Receive => TransferStatus::Receiving,
        };
        let progress = ProgressTracker::new(metadata.size, progress_interval);
        Self {
            file_id,
            direction,
            metadata,
            status,
            progress,
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Cumulative bytes moved.
    pub fn bytes_moved(&self) -> u64 {
        self.progress.transferred()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Counts `bytes` and returns a progress event when one is due.
    pub(crate) fn record(&mut self, bytes: u64) -> Option<TransferEvent> {
        self.progress
            .record(bytes)
            .map(|progress| TransferEvent::Progress {
                file_id: self.file_id,
                direction: self.direction,
                progress,
            })
    }

    /// Marks the session complete.
    pub(crate) fn complete(&mut self) -> TransferEvent {
        self.status = TransferStatus::Complete;
        self.progress.finish();
        TransferEvent::Completed {
            file_id: self.file_id,
            direction: self.direction,
            bytes: self.bytes_moved(),
        }
    }

    /// Ends the session with a failure status.
    pub(crate) fn fail(&mut self, status: TransferStatus, reason: impl fmt::Display) -> TransferEvent {
        self.status = status;
        TransferEvent::Failed {
            file_id: self.file_id,
            direction: self.direction,
            status,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn started(&self) -> TransferEvent {
        TransferEvent::Started {
            file_id: self.file_id,
            direction: self.direction,
            metadata: self.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(direction: Direction) -> TransferSession {
        TransferSession::new(
            FileId::generate(),
            direction,
            FileMetadata::new("a.bin", 100, "application/octet-stream"),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_initial_status_follows_direction() {
        assert_eq!(session(Direction::Send).status(), TransferStatus::Sending);
        assert_eq!(
            session(Direction::Receive).status(),
            TransferStatus::Receiving
        );
    }

    #[test]
    fn test_complete_reports_bytes() {
        let mut s = session(Direction::Receive);
        s.record(60);
        s.record(40);

        let event = s.complete();
        assert_eq!(
            event,
            TransferEvent::Completed {
                file_id: s.file_id(),
                direction: Direction::Receive,
                bytes: 100,
            }
        );
        assert_eq!(s.status(), TransferStatus::Complete);
        assert_eq!(s.progress().percent, 100.0);
    }

    #[test]
    fn test_fail_sets_status() {
        let mut s = session(Direction::Send);
        let event = s.fail(TransferStatus::Failed, TransferError::ChannelClosed);

        assert_eq!(s.status(), TransferStatus::Failed);
        assert!(s.status().is_terminal());
        match event {
            TransferEvent::Failed { reason, status, .. } => {
                assert_eq!(status, TransferStatus::Failed);
                assert!(reason.contains("channel closed"));
            }
            other => panic!("expected failure event, got {:?}", other),
        }
    }

    #[test]
    fn test_event_sink_without_listener() {
        let sink = EventSink::none();
        sink.emit(session(Direction::Send).started());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let s = session(Direction::Send);
        sink.emit(s.started());
        assert_eq!(rx.try_recv().unwrap().file_id(), s.file_id());
    }
}
