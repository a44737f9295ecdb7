//! Sending side of a transfer.
//!
//! A file is announced with `file-start`, streamed as identifier-prefixed
//! data frames and closed with `file-end`. Before every frame the channel's
//! pending-send byte count is checked against the high-water mark; above it
//! the sender sleeps for the poll interval and checks again.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use protocol::{chunk_count, ControlMessage, DataFrame, FileId, FileMetadata, DEFAULT_MIME_TYPE};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use super::session::{Direction, EventSink, TransferError, TransferSession, TransferStatus};
use crate::channel::{ChannelPayload, DataChannel};
use crate::config::TransferConfig;

/// Tuning for the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderSettings {
    pub chunk_size: usize,
    pub high_water_mark: usize,
    pub poll_interval: Duration,
    pub progress_interval: Duration,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for SenderSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            high_water_mark: config.high_water_mark,
            poll_interval: config.poll_interval(),
            progress_interval: config.progress_interval(),
        }
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub file_id: FileId,
    pub metadata: FileMetadata,
    pub bytes_sent: u64,
    pub frames_sent: u64,
}

/// Streams files over a [`DataChannel`].
pub struct FileSender<C: DataChannel> {
    channel: Arc<C>,
    settings: SenderSettings,
    cancel: CancellationToken,
    events: EventSink,
}

impl<C: DataChannel> FileSender<C> {
    pub fn new(channel: Arc<C>, settings: SenderSettings, cancel: CancellationToken) -> Self {
        Self {
            channel,
            settings,
            cancel,
            events: EventSink::none(),
        }
    }

    /// Forwards transfer events to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Sends a file from disk, optionally annotated with a description.
    pub async fn send_file(
        &self,
        path: &Path,
        description: Option<String>,
    ) -> Result<SendReport, TransferError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidPath(path.to_path_buf()))?
            .to_string();

        let file = tokio::fs::File::open(path).await?;
        let info = file.metadata().await?;
        if !info.is_file() {
            return Err(TransferError::InvalidPath(path.to_path_buf()));
        }

        let metadata = FileMetadata::new(name, info.len(), media_type_for(path))
            .with_description(description);
        self.send_reader(FileId::generate(), metadata, file).await
    }

    /// Sends `metadata.size` bytes read from `reader` as session `file_id`.
    pub async fn send_reader<R>(
        &self,
        file_id: FileId,
        metadata: FileMetadata,
        mut reader: R,
    ) -> Result<SendReport, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let mut session = TransferSession::new(
            file_id,
            Direction::Send,
            metadata,
            self.settings.progress_interval,
        );
        tracing::info!(
            file_id = %file_id,
            name = %session.metadata().name,
            size = session.metadata().size,
            frames = chunk_count(session.metadata().size, self.settings.chunk_size),
            "Starting file send"
        );

        let start = ControlMessage::file_start(file_id, session.metadata())
            .encode()
            .map_err(TransferError::Malformed)?;
        if let Err(e) = self.channel.send(ChannelPayload::Text(start)).await {
            let err = TransferError::Send(e);
            self.events.emit(session.fail(TransferStatus::Error, &err));
            return Err(err);
        }
        self.events.emit(session.started());

        match self.stream(&mut session, &mut reader).await {
            Ok(frames_sent) => {
                let bytes_sent = session.bytes_moved();
                self.events.emit(session.complete());
                tracing::info!(file_id = %file_id, bytes = bytes_sent, frames = frames_sent, "File sent");
                Ok(SendReport {
                    file_id,
                    metadata: session.metadata().clone(),
                    bytes_sent,
                    frames_sent,
                })
            }
            Err(err) => {
                tracing::warn!(file_id = %file_id, error = %err, "File send failed");
                self.events.emit(session.fail(TransferStatus::Failed, &err));
                Err(err)
            }
        }
    }

    /// Streams data frames and `file-end`, then drains the channel.
    async fn stream<R>(
        &self,
        session: &mut TransferSession,
        reader: &mut R,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let file_id = session.file_id();
        let declared = session.metadata().size;
        let mut frames = 0u64;

        let mut limited = (&mut *reader).take(declared);
        loop {
            let chunk = read_chunk(&mut limited, self.settings.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len() as u64;

            self.wait_below(self.settings.high_water_mark).await?;
            let frame = DataFrame::new(file_id, chunk.freeze());
            self.channel
                .send(ChannelPayload::Binary(frame.encode()))
                .await
                .map_err(TransferError::Send)?;

            frames += 1;
            if let Some(event) = session.record(len) {
                self.events.emit(event);
            }
        }

        let read = session.bytes_moved();
        if read < declared {
            return Err(TransferError::Incomplete {
                file_id,
                declared,
                received: read,
            });
        }
        // Anything past the declared size means the source grew while sending.
        let mut overflow = [0u8; 1];
        let extra = reader.read(&mut overflow).await?;
        if extra > 0 {
            return Err(TransferError::SizeExceeded {
                file_id,
                declared,
                received: declared + extra as u64,
            });
        }

        let end = ControlMessage::file_end(file_id)
            .encode()
            .map_err(TransferError::Malformed)?;
        self.channel
            .send(ChannelPayload::Text(end))
            .await
            .map_err(TransferError::Send)?;

        self.wait_below(0).await?;
        Ok(frames)
    }

    /// Waits until the channel's pending byte count is at most `limit`.
    async fn wait_below(&self, limit: usize) -> Result<(), TransferError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            if !self.channel.is_open() {
                return Err(TransferError::ChannelClosed);
            }

            let pending = self.channel.buffered_amount().await;
            if pending <= limit {
                return Ok(());
            }

            tracing::trace!(pending, limit, "Channel backlog above limit, deferring");
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }
}

/// Reads up to `chunk_size` bytes, fewer only at end of input.
async fn read_chunk<R>(reader: &mut R, chunk_size: usize) -> Result<BytesMut, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(chunk_size);
    let mut filled = 0;
    while filled < chunk_size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Guesses a media type from the file extension.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("txt" | "log") => "text/plain",
        Some("md") => "text/markdown",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz" | "tgz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => DEFAULT_MIME_TYPE,
    }
}
