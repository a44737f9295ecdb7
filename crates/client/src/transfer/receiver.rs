//! Receiving side of a transfer.
//!
//! Sessions are opened by `file-start`, fed by data frames carrying their
//! identifier and closed by `file-end`. Fragments are kept in receipt order
//! and concatenated only once the session completes.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use protocol::{ChannelMessage, ControlMessage, DataFrame, FileId, FileMetadata};

use super::session::{Direction, EventSink, TransferError, TransferSession, TransferStatus};
use crate::channel::ChannelPayload;

/// A fully reassembled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_id: FileId,
    pub metadata: FileMetadata,
    pub data: Bytes,
}

struct Inbound {
    session: TransferSession,
    fragments: Vec<Bytes>,
}

/// Reassembles files arriving on one channel.
pub struct FileReceiver {
    sessions: HashMap<FileId, Inbound>,
    progress_interval: Duration,
    events: EventSink,
}

impl FileReceiver {
    pub fn new(progress_interval: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            progress_interval,
            events: EventSink::none(),
        }
    }

    /// Forwards transfer events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Number of sessions still receiving.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Status of an open session.
    pub fn status(&self, file_id: &FileId) -> Option<TransferStatus> {
        self.sessions.get(file_id).map(|s| s.session.status())
    }

    /// Processes one channel message.
    ///
    /// Returns the reassembled file when the message completed a session.
    /// Errors concern a single message or session; the receiver stays usable.
    pub fn handle(&mut self, payload: ChannelPayload) -> Result<Option<ReceivedFile>, TransferError> {
        let message = match payload {
            ChannelPayload::Text(text) => ChannelMessage::from_text(&text),
            ChannelPayload::Binary(data) => ChannelMessage::from_binary(data),
        }
        .map_err(TransferError::Malformed)?;

        match message {
            ChannelMessage::Control(ControlMessage::FileStart {
                file_id,
                name,
                size,
                mime_type,
                description,
            }) => {
                let metadata =
                    FileMetadata::new(name, size, mime_type).with_description(description);
                self.open(file_id, metadata)?;
                Ok(None)
            }
            ChannelMessage::Control(ControlMessage::FileEnd { file_id }) => {
                self.finish(file_id).map(Some)
            }
            ChannelMessage::Data(frame) => self.append(frame).map(|_| None),
        }
    }

    /// Fails every open session; the channel went away before `file-end`.
    pub fn on_channel_closed(&mut self) -> Vec<FileId> {
        self.abort_all(TransferError::ChannelClosed)
    }

    /// Discards all buffered fragments.
    pub fn cancel(&mut self) -> Vec<FileId> {
        self.abort_all(TransferError::Cancelled)
    }

    fn open(&mut self, file_id: FileId, metadata: FileMetadata) -> Result<(), TransferError> {
        if self.sessions.contains_key(&file_id) {
            return Err(TransferError::DuplicateSession(file_id));
        }

        tracing::info!(
            file_id = %file_id,
            name = %metadata.name,
            size = metadata.size,
            mime_type = %metadata.mime_type,
            "Receiving file"
        );
        let session = TransferSession::new(
            file_id,
            Direction::Receive,
            metadata,
            self.progress_interval,
        );
        self.events.emit(session.started());
        self.sessions.insert(
            file_id,
            Inbound {
                session,
                fragments: Vec::new(),
            },
        );
        Ok(())
    }

    fn append(&mut self, frame: DataFrame) -> Result<(), TransferError> {
        let file_id = frame.file_id;
        let inbound = self
            .sessions
            .get_mut(&file_id)
            .ok_or(TransferError::UnknownSession(file_id))?;

        let declared = inbound.session.metadata().size;
        let received = inbound.session.bytes_moved() + frame.payload.len() as u64;
        if received > declared {
            let err = TransferError::SizeExceeded {
                file_id,
                declared,
                received,
            };
            self.fail(file_id, &err);
            return Err(err);
        }

        let len = frame.payload.len() as u64;
        inbound.fragments.push(frame.payload);
        if let Some(event) = inbound.session.record(len) {
            self.events.emit(event);
        }
        Ok(())
    }

    fn finish(&mut self, file_id: FileId) -> Result<ReceivedFile, TransferError> {
        let mut inbound = self
            .sessions
            .remove(&file_id)
            .ok_or(TransferError::UnknownSession(file_id))?;

        let declared = inbound.session.metadata().size;
        let received = inbound.session.bytes_moved();
        if received != declared {
            let err = TransferError::Incomplete {
                file_id,
                declared,
                received,
            };
            tracing::warn!(file_id = %file_id, error = %err, "Transfer incomplete");
            self.events
                .emit(inbound.session.fail(TransferStatus::Failed, &err));
            return Err(err);
        }

        let mut data = BytesMut::with_capacity(received as usize);
        for fragment in inbound.fragments.drain(..) {
            data.extend_from_slice(&fragment);
        }

        self.events.emit(inbound.session.complete());
        tracing::info!(file_id = %file_id, bytes = received, "File received");

        Ok(ReceivedFile {
            file_id,
            metadata: inbound.session.metadata().clone(),
            data: data.freeze(),
        })
    }

    fn fail(&mut self, file_id: FileId, err: &TransferError) {
        if let Some(mut inbound) = self.sessions.remove(&file_id) {
            tracing::warn!(file_id = %file_id, error = %err, "Receive failed");
            self.events
                .emit(inbound.session.fail(TransferStatus::Failed, err));
        }
    }

    fn abort_all(&mut self, err: TransferError) -> Vec<FileId> {
        let ids: Vec<FileId> = self.sessions.keys().copied().collect();
        for file_id in &ids {
            self.fail(*file_id, &err);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::session::TransferEvent;
    use tokio::sync::mpsc;

    fn receiver() -> (FileReceiver, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            FileReceiver::new(Duration::from_millis(500)).with_events(EventSink::new(tx)),
            rx,
        )
    }

    fn start(file_id: FileId, size: u64) -> ChannelPayload {
        let metadata = FileMetadata::new("f.txt", size, "text/plain");
        ChannelPayload::Text(
            ControlMessage::file_start(file_id, &metadata)
                .encode()
                .unwrap(),
        )
    }

    fn data(file_id: FileId, bytes: &'static [u8]) -> ChannelPayload {
        ChannelPayload::Binary(DataFrame::new(file_id, Bytes::from_static(bytes)).encode())
    }

    fn end(file_id: FileId) -> ChannelPayload {
        ChannelPayload::Text(ControlMessage::file_end(file_id).encode().unwrap())
    }

    #[test]
    fn test_reassembles_in_receipt_order() {
        let (mut rx, _events) = receiver();
        let id = FileId::generate();

        assert!(rx.handle(start(id, 11)).unwrap().is_none());
        assert_eq!(rx.status(&id), Some(TransferStatus::Receiving));
        rx.handle(data(id, b"hello ")).unwrap();
        rx.handle(data(id, b"world")).unwrap();

        let file = rx.handle(end(id)).unwrap().unwrap();
        assert_eq!(file.data, Bytes::from_static(b"hello world"));
        assert_eq!(file.metadata.mime_type, "text/plain");
        assert_eq!(rx.active_sessions(), 0);
    }

    #[test]
    fn test_interleaved_sessions_do_not_alias() {
        let (mut rx, _events) = receiver();
        let a = FileId::generate();
        let b = FileId::generate();

        rx.handle(start(a, 4)).unwrap();
        rx.handle(start(b, 4)).unwrap();
        rx.handle(data(a, b"aa")).unwrap();
        rx.handle(data(b, b"bb")).unwrap();
        rx.handle(data(b, b"BB")).unwrap();
        rx.handle(data(a, b"AA")).unwrap();

        assert_eq!(
            rx.handle(end(b)).unwrap().unwrap().data,
            Bytes::from_static(b"bbBB")
        );
        assert_eq!(
            rx.handle(end(a)).unwrap().unwrap().data,
            Bytes::from_static(b"aaAA")
        );
    }

    #[test]
    fn test_unknown_session_is_dropped() {
        let (mut rx, _events) = receiver();
        let known = FileId::generate();
        rx.handle(start(known, 3)).unwrap();

        let stray = FileId::generate();
        assert!(matches!(
            rx.handle(data(stray, b"zzz")),
            Err(TransferError::UnknownSession(id)) if id == stray
        ));

        // The open session is untouched.
        rx.handle(data(known, b"abc")).unwrap();
        assert!(rx.handle(end(known)).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_start_rejected() {
        let (mut rx, _events) = receiver();
        let id = FileId::generate();
        rx.handle(start(id, 2)).unwrap();
        rx.handle(data(id, b"x")).unwrap();

        assert!(matches!(
            rx.handle(start(id, 2)),
            Err(TransferError::DuplicateSession(_))
        ));
        rx.handle(data(id, b"y")).unwrap();
        assert_eq!(
            rx.handle(end(id)).unwrap().unwrap().data,
            Bytes::from_static(b"xy")
        );
    }

    #[test]
    fn test_overflow_fails_immediately() {
        let (mut rx, mut events) = receiver();
        let id = FileId::generate();
        rx.handle(start(id, 3)).unwrap();

        assert!(matches!(
            rx.handle(data(id, b"four")),
            Err(TransferError::SizeExceeded {
                declared: 3,
                received: 4,
                ..
            })
        ));
        assert_eq!(rx.status(&id), None);

        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            failed |= matches!(event, TransferEvent::Failed { .. });
        }
        assert!(failed);

        // Remaining frames for the failed session are unknown now.
        assert!(matches!(
            rx.handle(end(id)),
            Err(TransferError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_short_file_end_is_failed() {
        let (mut rx, mut events) = receiver();
        let id = FileId::generate();
        rx.handle(start(id, 10)).unwrap();
        rx.handle(data(id, b"12345")).unwrap();

        assert!(matches!(
            rx.handle(end(id)),
            Err(TransferError::Incomplete {
                declared: 10,
                received: 5,
                ..
            })
        ));

        let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
        assert!(matches!(
            last,
            TransferEvent::Failed {
                status: TransferStatus::Failed,
                ..
            }
        ));
    }

    #[test]
    fn test_channel_close_fails_open_sessions() {
        let (mut rx, mut events) = receiver();
        let done = FileId::generate();
        let open = FileId::generate();

        rx.handle(start(done, 1)).unwrap();
        rx.handle(data(done, b"!")).unwrap();
        rx.handle(end(done)).unwrap();
        rx.handle(start(open, 100)).unwrap();
        rx.handle(data(open, b"partial")).unwrap();

        assert_eq!(rx.on_channel_closed(), vec![open]);
        assert_eq!(rx.active_sessions(), 0);

        let failures: Vec<FileId> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|e| match e {
                TransferEvent::Failed { file_id, .. } => Some(file_id),
                _ => None,
            })
            .collect();
        assert_eq!(failures, vec![open]);
    }

    #[test]
    fn test_cancel_discards_fragments() {
        let (mut rx, _events) = receiver();
        let id = FileId::generate();
        rx.handle(start(id, 4)).unwrap();
        rx.handle(data(id, b"ab")).unwrap();

        assert_eq!(rx.cancel(), vec![id]);
        assert!(matches!(
            rx.handle(data(id, b"cd")),
            Err(TransferError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_empty_file() {
        let (mut rx, _events) = receiver();
        let id = FileId::generate();
        rx.handle(start(id, 0)).unwrap();

        let file = rx.handle(end(id)).unwrap().unwrap();
        assert!(file.data.is_empty());
    }

    #[test]
    fn test_malformed_messages_rejected() {
        let (mut rx, _events) = receiver();
        assert!(matches!(
            rx.handle(ChannelPayload::Text("{}".to_string())),
            Err(TransferError::Malformed(_))
        ));
        assert!(matches!(
            rx.handle(ChannelPayload::Binary(Bytes::from_static(b"short"))),
            Err(TransferError::Malformed(_))
        ));
    }
}
