//! WebSocket connection to the rendezvous service.
//!
//! A connection runs two background tasks:
//! - a writer that serializes outgoing [`ClientMessage`]s and sends heartbeat
//!   pings on a fixed interval
//! - a reader that parses incoming [`ServerMessage`]s and records pongs
//!
//! The connection is considered dead when no pong arrived within the
//! heartbeat interval plus timeout; both tasks then stop and the incoming
//! queue ends.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use protocol::error::{ProtocolError, Result};
use protocol::signaling::{ClientMessage, ServerMessage};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use crate::config::NetworkConfig;
use crate::negotiation::SignalingSink;

/// Settings for a rendezvous connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingConfig {
    /// Service URL (`ws://` or `wss://`).
    pub url: String,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Extra time allowed for a pong before the connection is dropped.
    pub heartbeat_timeout: Duration,
}

impl From<&NetworkConfig> for SignalingConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            url: config.signaling_url.clone(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_interval(),
        }
    }
}

/// Handle to a live rendezvous connection.
///
/// Dropping the handle closes the connection.
pub struct SignalingClient {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    shutdown: CancellationToken,
}

impl SignalingClient {
    /// Connects and returns the handle plus the queue of incoming messages.
    pub async fn connect(
        config: &SignalingConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerMessage>)> {
        tracing::info!(url = %config.url, "Connecting to rendezvous service");

        let (ws_stream, _) = connect_async(config.url.as_str())
            .await
            .map_err(|e| match e {
                WsError::Io(io_err) => ProtocolError::from(io_err),
                _ => ProtocolError::ConnectionClosed(format!("WebSocket connection failed: {}", e)),
            })?;
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let shutdown = CancellationToken::new();

        // Initialized to now for a grace period
        let last_pong = Arc::new(RwLock::new(Instant::now()));

        let writer_shutdown = shutdown.clone();
        let writer_pong = Arc::clone(&last_pong);
        let interval = config.heartbeat_interval;
        let deadline = config.heartbeat_interval + config.heartbeat_timeout;
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(interval);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = ws_sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    message = outgoing_rx.recv() => {
                        let Some(message) = message else {
                            let _ = ws_sink.send(WsMessage::Close(None)).await;
                            break;
                        };
                        match message.to_json() {
                            Ok(json) => {
                                if let Err(e) = ws_sink.send(WsMessage::Text(json)).await {
                                    tracing::error!(error = %e, "Failed to send signaling message");
                                    break;
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "Failed to serialize signaling message"),
                        }
                    }
                    _ = heartbeat.tick() => {
                        if writer_pong.read().await.elapsed() > deadline {
                            tracing::warn!("Heartbeat timeout, dropping rendezvous connection");
                            break;
                        }
                        if let Err(e) = ws_sink.send(WsMessage::Ping(Vec::new())).await {
                            tracing::error!(error = %e, "Failed to send heartbeat ping");
                            break;
                        }
                    }
                }
            }
            writer_shutdown.cancel();
        });

        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    frame = ws_stream.next() => frame,
                };

                match frame {
                    Some(Ok(WsMessage::Text(text))) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            tracing::trace!(?message, "Signaling message received");
                            if incoming_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, raw = %text, "Failed to parse signaling message");
                        }
                    },
                    Some(Ok(WsMessage::Pong(_))) => {
                        *last_pong.write().await = Instant::now();
                        tracing::trace!("Received heartbeat pong");
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!("Rendezvous service closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Rendezvous connection error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            reader_shutdown.cancel();
        });

        Ok((
            Self {
                outgoing: outgoing_tx,
                shutdown,
            },
            incoming_rx,
        ))
    }

    /// Queues a message for the rendezvous service.
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed(
                "rendezvous connection closed".to_string(),
            ));
        }
        self.outgoing.send(message).map_err(|_| {
            ProtocolError::ConnectionClosed("rendezvous connection closed".to_string())
        })
    }

    /// Closes the connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl SignalingSink for SignalingClient {
    fn send(&self, message: ClientMessage) -> Result<()> {
        SignalingClient::send(self, message)
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
