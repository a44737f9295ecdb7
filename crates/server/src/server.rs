//! WebSocket rendezvous service.
//!
//! Each accepted TCP connection is either a health query or a signaling
//! WebSocket. Signaling connections get a peer id from the [`Registry`] and an
//! outbound queue in the connection table. Registry operations and the
//! deliveries they produce happen under one lock, so every peer observes
//! notifications in the order the registry mutated.
//!
//! Outbound queues are bounded. A connection whose queue is full is removed
//! from the table; its writer drains what is queued, closes the socket, and
//! the reader side then unregisters the peer as for any other disconnect.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use protocol::signaling::{ClientMessage, PeerId, ServerMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_OUTBOUND_QUEUE_SIZE};
use crate::health::{self, HealthReport};
use crate::registry::{Outbound, Registry, INTERNAL_ERROR_MESSAGE};

/// Outbound queue feeding one connection's writer task.
pub type PeerSender = mpsc::Sender<ServerMessage>;

/// State shared by every connection task.
pub struct ServerState {
    registry: Mutex<Registry>,
    connections: DashMap<PeerId, PeerSender>,
    started_at: Instant,
    max_message_size: usize,
    outbound_queue_size: usize,
}

impl ServerState {
    /// Creates shared state around a registry.
    pub fn new(registry: Registry, max_message_size: usize) -> Self {
        Self {
            registry: Mutex::new(registry),
            connections: DashMap::new(),
            started_at: Instant::now(),
            max_message_size,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
        }
    }

    /// Sets the per-connection outbound queue capacity.
    pub fn with_outbound_queue_size(mut self, size: usize) -> Self {
        self.outbound_queue_size = size.max(1);
        self
    }

    /// Creates an outbound queue sized for one connection.
    pub fn outbound_queue(&self) -> (PeerSender, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(self.outbound_queue_size)
    }

    fn lock_registry(&self) -> Option<MutexGuard<'_, Registry>> {
        match self.registry.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!("Registry lock poisoned");
                None
            }
        }
    }

    /// Queues `message` for `to`. Returns false when the queue is full.
    fn enqueue(&self, to: &PeerId, message: ServerMessage) -> bool {
        let Some(sender) = self.connections.get(to) else {
            tracing::debug!(peer_id = %to, "Dropping message for unknown connection");
            return true;
        };
        match sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(peer_id = %to, "Dropping message for closing connection");
                true
            }
            Err(TrySendError::Full(_)) => false,
        }
    }

    fn evict(&self, peer_id: &PeerId) {
        if self.connections.remove(peer_id).is_some() {
            tracing::warn!(
                peer_id = %peer_id,
                capacity = self.outbound_queue_size,
                "Outbound queue full, dropping connection"
            );
        }
    }

    fn deliver(&self, out: Vec<Outbound>) {
        let mut stalled: Vec<PeerId> = Vec::new();
        for Outbound { to, message } in out {
            if stalled.contains(&to) {
                continue;
            }
            if !self.enqueue(&to, message) {
                stalled.push(to);
            }
        }
        for peer_id in &stalled {
            self.evict(peer_id);
        }
    }

    /// Registers a connection and queues its peer id announcement.
    pub fn register(&self, sender: PeerSender) -> Option<PeerId> {
        let mut registry = self.lock_registry()?;
        let (peer_id, out) = registry.connect();
        self.connections.insert(peer_id.clone(), sender);
        self.deliver(out);
        Some(peer_id)
    }

    /// Removes a connection, notifying its room.
    pub fn unregister(&self, peer_id: &PeerId) {
        let Some(mut registry) = self.lock_registry() else {
            self.connections.remove(peer_id);
            return;
        };
        self.connections.remove(peer_id);
        let out = registry.disconnect(peer_id);
        self.deliver(out);
    }

    /// Handles one text frame from a peer.
    pub fn handle_text(&self, peer_id: &PeerId, text: &str) {
        if text.len() > self.max_message_size {
            tracing::warn!(
                peer_id = %peer_id,
                size = text.len(),
                limit = self.max_message_size,
                "Oversized signaling message"
            );
            self.reply_error(
                peer_id,
                format!("message exceeds {} bytes", self.max_message_size),
            );
            return;
        }

        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(peer_id, message),
            Err(e) => {
                tracing::debug!(peer_id = %peer_id, error = %e, "Malformed signaling message");
                self.reply_error(peer_id, format!("malformed message: {}", e));
            }
        }
    }

    /// Applies a decoded message to the registry and delivers the result.
    pub fn handle_message(&self, peer_id: &PeerId, message: ClientMessage) {
        let Some(mut registry) = self.lock_registry() else {
            self.reply_error(peer_id, INTERNAL_ERROR_MESSAGE);
            return;
        };
        let out = registry.handle(peer_id, message);
        self.deliver(out);
    }

    fn reply_error(&self, peer_id: &PeerId, message: impl Into<String>) {
        if !self.enqueue(peer_id, ServerMessage::error(message)) {
            self.evict(peer_id);
        }
    }

    /// Current health report.
    pub fn health(&self) -> HealthReport {
        let (peers, rooms) = match self.lock_registry() {
            Some(registry) => (registry.peer_count(), registry.room_count()),
            None => (self.connections.len(), 0),
        };
        HealthReport::ok(peers, rooms, self.started_at.elapsed())
    }
}

/// The rendezvous service: a bound listener plus shared state.
pub struct SignalingServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl SignalingServer {
    /// Binds the listener described by `config`.
    pub async fn bind(config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

        let registry = Registry::new().with_max_code_attempts(config.rooms.max_code_attempts);
        let state = Arc::new(
            ServerState::new(registry, config.server.max_message_size)
                .with_outbound_queue_size(config.server.outbound_queue_size),
        );

        Ok(Self { listener, state })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Rendezvous service listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Rendezvous service shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            let token = shutdown.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(state, stream, addr, token).await {
                                    tracing::debug!(%addr, error = %e, "Connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    state: Arc<ServerState>,
    stream: TcpStream,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    if health::is_health_request(&stream).await? {
        tracing::debug!(%addr, "Health check");
        return health::respond(stream, &state.health()).await;
    }

    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (tx, mut rx) = state.outbound_queue();
    let Some(peer_id) = state.register(tx) else {
        let _ = ws_tx.close().await;
        anyhow::bail!("registry unavailable");
    };
    tracing::info!(peer_id = %peer_id, %addr, "Signaling connection opened");

    let writer_peer = peer_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(peer_id = %writer_peer, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                tracing::debug!(peer_id = %writer_peer, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => state.handle_text(&peer_id, &text),
                    Some(Ok(WsMessage::Binary(_))) => {
                        state.reply_error(&peer_id, "binary messages are not supported");
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    // Ping/pong is answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(peer_id = %peer_id, error = %e, "WebSocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    state.unregister(&peer_id);
    let _ = writer.await;
    tracing::info!(peer_id = %peer_id, "Signaling connection closed");
    Ok(())
}
