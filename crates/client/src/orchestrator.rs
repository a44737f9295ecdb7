//! Send and receive flows.
//!
//! Each flow connects to the rendezvous service, negotiates a peer
//! connection through the [`Coordinator`] and then hands the open files
//! channel to the transfer session manager. Progress is reported as
//! [`FlowEvent`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use protocol::signaling::{ClientMessage, PeerId, RoomCode, ServerMessage};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelEvent, ChannelReceiver};
use crate::config::Config;
use crate::negotiation::{
    Coordinator, NegotiationEvent, NegotiationState, NegotiationTransport, Role, SignalingSink,
};
use crate::network::{
    SignalingClient, SignalingConfig, TransportEvent, WebRtcChannel, WebRtcConfig, WebRtcTransport,
};
use crate::summarize::{describe, HttpSummarizer, Summarizer};
use crate::transfer::{
    EventSink, FileReceiver, FileSender, ReceivedFile, SendReport, SenderSettings, TransferEvent,
};

/// How long to wait for the rendezvous service to answer a request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Name used when a received file name is unusable.
const FALLBACK_FILE_NAME: &str = "received.bin";

/// Milestones of a send or receive flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// A room was created; share this code with the receiver.
    RoomCreated(RoomCode),
    /// Joined the sender's room.
    RoomJoined(RoomCode),
    /// The peer channel is open.
    PeerConnected(PeerId),
    Transfer(TransferEvent),
    /// A received file was written to disk.
    Saved { name: String, path: PathBuf },
}

/// Connection to the rendezvous service after the greeting.
struct Rendezvous {
    client: Arc<SignalingClient>,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
    peer_id: PeerId,
}

impl Rendezvous {
    async fn connect(config: &Config) -> Result<Self> {
        let (client, mut incoming) =
            SignalingClient::connect(&SignalingConfig::from(&config.network))
                .await
                .with_context(|| {
                    format!(
                        "Failed to connect to rendezvous service at {}",
                        config.network.signaling_url
                    )
                })?;

        let peer_id = match next_reply(&mut incoming).await? {
            ServerMessage::PeerId { peer_id } => peer_id,
            other => bail!("Unexpected greeting from rendezvous service: {:?}", other),
        };
        tracing::info!(peer_id = %peer_id, "Connected to rendezvous service");

        Ok(Self {
            client: Arc::new(client),
            incoming,
            peer_id,
        })
    }

    async fn create_room(&mut self) -> Result<RoomCode> {
        self.client.send(ClientMessage::CreateRoom)?;
        match next_reply(&mut self.incoming).await? {
            ServerMessage::RoomCreated { room_id } => Ok(room_id),
            ServerMessage::Error { message } => bail!("Could not create room: {}", message),
            other => bail!("Unexpected reply to create-room: {:?}", other),
        }
    }

    async fn join_room(&mut self, code: RoomCode) -> Result<Vec<PeerId>> {
        self.client.send(ClientMessage::JoinRoom {
            room_id: code.clone(),
        })?;
        match next_reply(&mut self.incoming).await? {
            ServerMessage::RoomJoined { peers, .. } => Ok(peers),
            ServerMessage::Error { message } => bail!("Could not join room {}: {}", code, message),
            other => bail!("Unexpected reply to join-room: {:?}", other),
        }
    }

    /// Hands the incoming queue to another owner; later reads see an empty queue.
    fn take_incoming(&mut self) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (_, closed) = mpsc::unbounded_channel();
        std::mem::replace(&mut self.incoming, closed)
    }

    fn leave(&self) {
        // Best effort; the connection may already be gone.
        let _ = self.client.send(ClientMessage::LeaveRoom);
        self.client.close();
    }
}

async fn next_reply(incoming: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Result<ServerMessage> {
    tokio::time::timeout(REPLY_TIMEOUT, incoming.recv())
        .await
        .map_err(|_| anyhow!("Timed out waiting for the rendezvous service"))?
        .ok_or_else(|| anyhow!("Rendezvous connection closed"))
}

/// An established peer connection with its open files channel.
struct PeerLink {
    coordinator: Coordinator<WebRtcTransport, SignalingClient>,
    transport: Arc<WebRtcTransport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    channel: Arc<WebRtcChannel>,
    receiver: ChannelReceiver,
    peer: PeerId,
}

async fn close_link(transport: &WebRtcTransport, channel: &WebRtcChannel) {
    if let Err(e) = channel.close().await {
        tracing::debug!(error = %e, "Closing files channel failed");
    }
    if let Err(e) = transport.close().await {
        tracing::debug!(error = %e, "Closing peer connection failed");
    }
}

/// Maps a relayed signaling message onto a negotiation event.
fn negotiation_event(message: ServerMessage) -> Option<NegotiationEvent> {
    match message {
        ServerMessage::PeerJoined { peer_id } => Some(NegotiationEvent::PeerJoined(peer_id)),
        ServerMessage::PeerLeft { peer_id } => Some(NegotiationEvent::PeerLeft(peer_id)),
        ServerMessage::Offer { from, offer } => Some(NegotiationEvent::OfferReceived { from, offer }),
        ServerMessage::Answer { from, answer } => {
            Some(NegotiationEvent::AnswerReceived { from, answer })
        }
        ServerMessage::IceCandidate { from, candidate } => {
            Some(NegotiationEvent::RemoteCandidate { from, candidate })
        }
        ServerMessage::Error { message } => {
            tracing::warn!(message = %message, "Rendezvous service reported an error");
            None
        }
        other => {
            tracing::debug!(?other, "Ignoring signaling message");
            None
        }
    }
}

/// Negotiates a peer connection and waits for the files channel.
async fn establish(
    role: Role,
    config: &Config,
    rendezvous: &mut Rendezvous,
    cancel: &CancellationToken,
) -> Result<PeerLink> {
    let (transport, mut transport_events) =
        WebRtcTransport::new(&WebRtcConfig::from(&config.network)).await?;
    let transport = Arc::new(transport);
    match role {
        Role::Host => transport.open_channel().await?,
        Role::Joiner => transport.accept_channels(),
    }

    let mut coordinator = Coordinator::new(role, Arc::clone(&transport), Arc::clone(&rendezvous.client));
    coordinator.handle(NegotiationEvent::Start).await?;

    let mut opened: Option<(Arc<WebRtcChannel>, ChannelReceiver)> = None;
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = transport.close().await;
                bail!("Cancelled while connecting");
            }
            message = rendezvous.incoming.recv() => match message {
                Some(message) => negotiation_event(message),
                None => bail!("Rendezvous connection closed during negotiation"),
            },
            event = transport_events.recv() => match event {
                Some(TransportEvent::LocalCandidate(candidate)) => {
                    Some(NegotiationEvent::LocalCandidate(candidate))
                }
                Some(TransportEvent::Connected) => Some(NegotiationEvent::TransportConnected),
                Some(TransportEvent::Disconnected(reason)) => {
                    Some(NegotiationEvent::TransportFailed(reason))
                }
                Some(TransportEvent::ChannelOpen { channel, receiver }) => {
                    opened = Some((channel, receiver));
                    None
                }
                None => bail!("Peer transport stopped"),
            },
        };

        if let Some(event) = event {
            coordinator
                .handle(event)
                .await
                .context("Peer negotiation failed")?;
        }

        if coordinator.is_closed() {
            let _ = transport.close().await;
            bail!("Peer connection closed before it was established");
        }

        if coordinator.state() == NegotiationState::Connected {
            if let Some((channel, receiver)) = opened.take() {
                let peer = coordinator
                    .remote_peer()
                    .cloned()
                    .ok_or_else(|| anyhow!("Connected without a remote peer"))?;
                tracing::info!(peer_id = %peer, local = %rendezvous.peer_id, "Peer channel ready");
                return Ok(PeerLink {
                    coordinator,
                    transport,
                    transport_events,
                    channel,
                    receiver,
                    peer,
                });
            }
        }
    }
}

/// Keeps negotiation running while files move.
///
/// Candidates trickled by either side after the channel opened still pass
/// through the coordinator. `lost` is cancelled when the transport reports a
/// disconnect.
fn spawn_link_monitor<T, S>(
    mut coordinator: Coordinator<T, S>,
    mut incoming: mpsc::UnboundedReceiver<ServerMessage>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    lost: CancellationToken,
) -> JoinHandle<()>
where
    T: NegotiationTransport + 'static,
    S: SignalingSink + 'static,
{
    tokio::spawn(async move {
        let mut signaling_open = true;
        loop {
            let event = tokio::select! {
                message = incoming.recv(), if signaling_open => match message {
                    Some(message) => negotiation_event(message),
                    None => {
                        tracing::debug!("Rendezvous connection ended during transfer");
                        signaling_open = false;
                        None
                    }
                },
                event = transport_events.recv() => match event {
                    Some(TransportEvent::LocalCandidate(candidate)) => {
                        Some(NegotiationEvent::LocalCandidate(candidate))
                    }
                    Some(TransportEvent::Disconnected(reason)) => {
                        tracing::warn!(reason = %reason, "Peer connection lost");
                        lost.cancel();
                        break;
                    }
                    Some(_) => None,
                    None => break,
                },
            };

            if let Some(event) = event {
                if let Err(e) = coordinator.handle(event).await {
                    tracing::warn!(error = %e, "Negotiation error on an established link");
                }
            }
        }
    })
}

/// Forwards transfer events into the flow event stream.
fn transfer_sink(events: &mpsc::UnboundedSender<FlowEvent>) -> EventSink {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let events = events.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if events.send(FlowEvent::Transfer(event)).is_err() {
                break;
            }
        }
    });
    EventSink::new(tx)
}

/// Creates a room, waits for a receiver and sends `files` in order.
pub async fn send_files(
    config: &Config,
    files: &[PathBuf],
    events: mpsc::UnboundedSender<FlowEvent>,
    cancel: CancellationToken,
) -> Result<Vec<SendReport>> {
    for path in files {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        if !meta.is_file() {
            bail!("{} is not a regular file", path.display());
        }
    }

    let mut rendezvous = Rendezvous::connect(config).await?;
    let code = rendezvous.create_room().await?;
    tracing::info!(room = %code, "Room created, waiting for receiver");
    let _ = events.send(FlowEvent::RoomCreated(code));

    let link = match establish(Role::Host, config, &mut rendezvous, &cancel).await {
        Ok(link) => link,
        Err(e) => {
            rendezvous.leave();
            return Err(e);
        }
    };
    let _ = events.send(FlowEvent::PeerConnected(link.peer.clone()));

    let PeerLink {
        coordinator,
        transport,
        transport_events,
        channel,
        receiver: _receiver,
        peer,
    } = link;

    // The connection-state signal stops flow control when the peer goes away.
    let transfer_cancel = cancel.child_token();
    let monitor = spawn_link_monitor(
        coordinator,
        rendezvous.take_incoming(),
        transport_events,
        transfer_cancel.clone(),
    );

    let summarizer = HttpSummarizer::from_config(&config.summarize);
    let sender = FileSender::new(
        Arc::clone(&channel),
        SenderSettings::from(&config.transfer),
        transfer_cancel,
    )
    .with_events(transfer_sink(&events));

    let mut reports = Vec::with_capacity(files.len());
    let mut outcome = Ok(());
    for path in files {
        let description = match &summarizer {
            Some(summarizer) => {
                describe(summarizer as &dyn Summarizer, path, config.summarize.prefix_bytes).await
            }
            None => None,
        };
        match sender.send_file(path, description).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                outcome = Err(anyhow!(e).context(format!("Failed to send {}", path.display())));
                break;
            }
        }
    }

    tracing::info!(peer_id = %peer, files = reports.len(), "Send flow finished");
    monitor.abort();
    close_link(&transport, &channel).await;
    rendezvous.leave();

    outcome.map(|_| reports)
}

/// Joins room `code` and saves every file received into `output_dir`.
pub async fn receive_files(
    config: &Config,
    code: &str,
    output_dir: &Path,
    events: mpsc::UnboundedSender<FlowEvent>,
    cancel: CancellationToken,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Cannot create {}", output_dir.display()))?;

    let code = RoomCode::normalize(code);
    let mut rendezvous = Rendezvous::connect(config).await?;
    let peers = rendezvous.join_room(code.clone()).await?;
    tracing::info!(room = %code, peers = peers.len(), "Joined room");
    let _ = events.send(FlowEvent::RoomJoined(code));

    let link = match establish(Role::Joiner, config, &mut rendezvous, &cancel).await {
        Ok(link) => link,
        Err(e) => {
            rendezvous.leave();
            return Err(e);
        }
    };
    let _ = events.send(FlowEvent::PeerConnected(link.peer.clone()));

    let PeerLink {
        coordinator,
        transport,
        transport_events,
        channel,
        receiver: mut channel_rx,
        ..
    } = link;
    let lost = CancellationToken::new();
    let monitor = spawn_link_monitor(
        coordinator,
        rendezvous.take_incoming(),
        transport_events,
        lost.clone(),
    );

    let mut receiver = FileReceiver::new(config.transfer.progress_interval())
        .with_events(transfer_sink(&events));
    let mut saved = Vec::new();

    let outcome: Result<()> = loop {
        // Queued channel messages are handled before a disconnect is noticed.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let discarded = receiver.cancel();
                tracing::info!(discarded = discarded.len(), "Receive cancelled");
                break Err(anyhow!("Transfer cancelled"));
            }
            event = channel_rx.recv() => match event {
                Some(ChannelEvent::Message(payload)) => match receiver.handle(payload) {
                    Ok(Some(file)) => {
                        let path = match save(output_dir, &file).await {
                            Ok(path) => path,
                            Err(e) => break Err(e),
                        };
                        tracing::info!(path = %path.display(), "Saved received file");
                        let _ = events.send(FlowEvent::Saved {
                            name: file.metadata.name.clone(),
                            path: path.clone(),
                        });
                        saved.push(path);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Dropped channel message"),
                },
                Some(ChannelEvent::Closed) | None => break finish(&mut receiver),
            },
            _ = lost.cancelled() => break finish(&mut receiver),
        }
    };

    monitor.abort();
    close_link(&transport, &channel).await;
    rendezvous.leave();
    outcome.map(|_| saved)
}

/// Fails whatever is still open once the channel is gone.
fn finish(receiver: &mut FileReceiver) -> Result<()> {
    let unfinished = receiver.on_channel_closed();
    if unfinished.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "Channel closed with {} transfer(s) incomplete",
            unfinished.len()
        ))
    }
}

/// Writes a received file into `dir` without overwriting anything.
pub async fn save(dir: &Path, file: &ReceivedFile) -> Result<PathBuf> {
    let name = sanitize_file_name(&file.metadata.name);

    for attempt in 0u32.. {
        let path = dir.join(numbered_name(&name, attempt));
        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;

        match created {
            Ok(mut out) => {
                out.write_all(&file.data)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                out.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        }
    }

    bail!("No free file name for {}", name)
}

/// Reduces a peer-supplied name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `name` for attempt 0, `stem (n).ext` afterwards.
fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, attempt, ext),
        None => format!("{} ({})", stem, attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use protocol::signaling::{IceCandidate, SessionDescription};
    use protocol::{FileId, FileMetadata};
    use std::future::Future;
    use std::pin::Pin;
    use tempfile::TempDir;

    fn received(name: &str, data: &'static [u8]) -> ReceivedFile {
        ReceivedFile {
            file_id: FileId::generate(),
            metadata: FileMetadata::new(name, data.len() as u64, "text/plain"),
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("dir\\file.txt"), "dir_file.txt");
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("   "), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("a\nb"), "a_b");
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("photo.png", 0), "photo.png");
        assert_eq!(numbered_name("photo.png", 2), "photo (2).png");
        assert_eq!(numbered_name("archive.tar.gz", 1), "archive.tar (1).gz");
        assert_eq!(numbered_name("README", 1), "README (1)");
    }

    #[tokio::test]
    async fn test_save_does_not_overwrite() {
        let dir = TempDir::new().unwrap();

        let first = save(dir.path(), &received("a.txt", b"one")).await.unwrap();
        let second = save(dir.path(), &received("a.txt", b"two")).await.unwrap();

        assert_eq!(first, dir.path().join("a.txt"));
        assert_eq!(second, dir.path().join("a (1).txt"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_save_stays_inside_directory() {
        let dir = TempDir::new().unwrap();
        let path = save(dir.path(), &received("../escape.txt", b"x")).await.unwrap();
        assert_eq!(path.parent(), Some(dir.path()));
    }

    #[test]
    fn test_negotiation_event_mapping() {
        let peer = PeerId::from("p");
        assert_eq!(
            negotiation_event(ServerMessage::PeerJoined {
                peer_id: peer.clone()
            }),
            Some(NegotiationEvent::PeerJoined(peer.clone()))
        );
        assert_eq!(
            negotiation_event(ServerMessage::Offer {
                from: peer.clone(),
                offer: SessionDescription::offer("v=0"),
            }),
            Some(NegotiationEvent::OfferReceived {
                from: peer,
                offer: SessionDescription::offer("v=0"),
            })
        );
        assert_eq!(negotiation_event(ServerMessage::error("room not found")), None);
        assert_eq!(
            negotiation_event(ServerMessage::RoomCreated {
                room_id: RoomCode::from("ABCDEF")
            }),
            None
        );
    }

    #[test]
    fn test_finish_reports_incomplete_transfers() {
        let mut receiver = FileReceiver::new(Duration::from_millis(500));
        assert!(finish(&mut receiver).is_ok());

        let id = FileId::generate();
        let start = protocol::ControlMessage::file_start(id, &FileMetadata::new("x", 5, "text/plain"))
            .encode()
            .unwrap();
        receiver
            .handle(crate::channel::ChannelPayload::Text(start))
            .unwrap();
        assert!(finish(&mut receiver).is_err());
    }

    #[derive(Default)]
    struct RecordingTransport {
        applied: std::sync::Mutex<Vec<String>>,
    }

    impl NegotiationTransport for RecordingTransport {
        fn create_offer(
            &self,
        ) -> Pin<Box<dyn Future<Output = protocol::Result<SessionDescription>> + Send + '_>> {
            Box::pin(async { Ok(SessionDescription::offer("v=0 offer")) })
        }

        fn create_answer(
            &self,
        ) -> Pin<Box<dyn Future<Output = protocol::Result<SessionDescription>> + Send + '_>> {
            Box::pin(async { Ok(SessionDescription::answer("v=0 answer")) })
        }

        fn set_remote_description(
            &self,
            _description: SessionDescription,
        ) -> Pin<Box<dyn Future<Output = protocol::Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn add_ice_candidate(
            &self,
            candidate: IceCandidate,
        ) -> Pin<Box<dyn Future<Output = protocol::Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.applied.lock().unwrap().push(candidate.candidate);
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: std::sync::Mutex<Vec<ClientMessage>>,
    }

    impl SignalingSink for RecordingSink {
        fn send(&self, message: ClientMessage) -> protocol::Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn ice(text: &str) -> IceCandidate {
        IceCandidate {
            candidate: text.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_link_monitor_trickles_candidates_after_connect() {
        let transport = Arc::new(RecordingTransport::default());
        let sink = Arc::new(RecordingSink::default());
        let host = PeerId::from("host");

        let mut joiner = Coordinator::new(Role::Joiner, Arc::clone(&transport), Arc::clone(&sink));
        joiner.handle(NegotiationEvent::Start).await.unwrap();
        joiner
            .handle(NegotiationEvent::OfferReceived {
                from: host.clone(),
                offer: SessionDescription::offer("v=0 host"),
            })
            .await
            .unwrap();
        joiner
            .handle(NegotiationEvent::TransportConnected)
            .await
            .unwrap();
        assert_eq!(joiner.state(), NegotiationState::Connected);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let lost = CancellationToken::new();
        let monitor = spawn_link_monitor(joiner, signal_rx, transport_rx, lost.clone());

        signal_tx
            .send(ServerMessage::IceCandidate {
                from: host.clone(),
                candidate: ice("remote-late"),
            })
            .unwrap();
        transport_tx
            .send(TransportEvent::LocalCandidate(ice("local-late")))
            .unwrap();

        wait_until(|| transport.applied.lock().unwrap().len() == 1).await;
        wait_until(|| sink.sent.lock().unwrap().len() == 2).await;
        assert_eq!(*transport.applied.lock().unwrap(), vec!["remote-late"]);
        assert_eq!(
            sink.sent.lock().unwrap().last(),
            Some(&ClientMessage::IceCandidate {
                to: Some(host),
                candidate: ice("local-late"),
            })
        );
        assert!(!lost.is_cancelled());

        transport_tx
            .send(TransportEvent::Disconnected("failed".to_string()))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), lost.cancelled())
            .await
            .unwrap();
        monitor.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejects_missing_file_before_connecting() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = send_files(
            &Config::default(),
            &[dir.path().join("missing.bin")],
            tx,
            CancellationToken::new(),
        )
        .await;

        let err = format!("{:#}", result.unwrap_err());
        assert!(err.contains("Cannot read"));
    }
}
