//! WebRTC transport for peer channels.
//!
//! This module wraps a `webrtc` peer connection with:
//! - ICE server configuration (STUN/TURN)
//! - Offer/answer primitives for the negotiation coordinator
//! - Remote candidate buffering until the remote description is applied
//! - The ordered `files` data channel exposed as a [`DataChannel`]
//!
//! Callback-driven transport activity is turned into [`TransportEvent`]s on
//! an unbounded queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use protocol::error::{ProtocolError, Result};
use protocol::signaling::{IceCandidate, SdpType, SessionDescription};
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::channel::{ChannelEvent, ChannelPayload, ChannelReceiver, DataChannel};
use crate::config::NetworkConfig;
use crate::negotiation::NegotiationTransport;

/// Label of the file transfer data channel.
pub const FILES_CHANNEL_LABEL: &str = "files";

/// A server the ICE agent gathers candidates through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceServer {
    /// Server-reflexive address discovery, no credentials.
    Stun(String),
    /// Relay reached with long-term credentials.
    Turn {
        url: String,
        username: String,
        credential: String,
    },
}

impl From<IceServer> for RTCIceServer {
    fn from(server: IceServer) -> Self {
        match server {
            IceServer::Stun(url) => RTCIceServer {
                urls: vec![url],
                ..Default::default()
            },
            IceServer::Turn {
                url,
                username,
                credential,
            } => RTCIceServer {
                urls: vec![url],
                username,
                credential,
            },
        }
    }
}

/// Configuration for the peer connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebRtcConfig {
    /// ICE servers for connectivity.
    pub ice_servers: Vec<IceServer>,
}

impl From<&NetworkConfig> for WebRtcConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            ice_servers: config
                .stun_servers
                .iter()
                .map(|url| IceServer::Stun(url.clone()))
                .chain(config.turn_servers.iter().map(|turn| IceServer::Turn {
                    url: turn.url.clone(),
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                }))
                .collect(),
        }
    }
}

impl WebRtcConfig {
    fn to_rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.iter().cloned().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Activity reported by the transport.
pub enum TransportEvent {
    /// A local candidate was gathered.
    LocalCandidate(IceCandidate),
    /// The peer connection is established.
    Connected,
    /// The peer connection failed, disconnected or closed.
    Disconnected(String),
    /// The files channel is open and ready for transfers.
    ChannelOpen {
        channel: Arc<WebRtcChannel>,
        receiver: ChannelReceiver,
    },
}

/// Peer connection plus the negotiation primitives the coordinator needs.
pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    /// Remote candidates waiting for the remote description.
    pending_remote: Mutex<Vec<RTCIceCandidateInit>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl WebRtcTransport {
    /// Creates a peer connection and the queue its events arrive on.
    pub async fn new(
        config: &WebRtcConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        // Required even for data-only connections
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            ProtocolError::NegotiationFailed(format!("failed to register codecs: {}", e))
        })?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            ProtocolError::NegotiationFailed(format!("failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = api
            .new_peer_connection(config.to_rtc_configuration())
            .await
            .map_err(|e| {
                ProtocolError::NegotiationFailed(format!("failed to create peer connection: {}", e))
            })?;
        let peer_connection = Arc::new(peer_connection);

        let (events, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else {
                    tracing::debug!("Local candidate gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize local candidate"),
                }
            })
        }));

        let state_tx = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                Box::pin(async move {
                    tracing::debug!(%state, "Peer connection state changed");
                    let event = match state {
                        RTCPeerConnectionState::Connected => Some(TransportEvent::Connected),
                        RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Closed => {
                            Some(TransportEvent::Disconnected(state.to_string()))
                        }
                        _ => None,
                    };
                    if let Some(event) = event {
                        let _ = tx.send(event);
                    }
                })
            },
        ));

        Ok((
            Self {
                peer_connection,
                pending_remote: Mutex::new(Vec::new()),
                events,
            },
            events_rx,
        ))
    }

    /// Creates the ordered files channel. Called by the host before the offer.
    pub async fn open_channel(&self) -> Result<()> {
        let options = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = self
            .peer_connection
            .create_data_channel(FILES_CHANNEL_LABEL, Some(options))
            .await
            .map_err(|e| {
                ProtocolError::NegotiationFailed(format!("failed to create files channel: {}", e))
            })?;

        wire_channel(channel, self.events.clone());
        Ok(())
    }

    /// Accepts the files channel opened by the remote host.
    pub fn accept_channels(&self) {
        let events = self.events.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let events = events.clone();
                Box::pin(async move {
                    if channel.label() != FILES_CHANNEL_LABEL {
                        tracing::warn!(label = %channel.label(), "Ignoring unknown data channel");
                        return;
                    }
                    wire_channel(channel, events);
                })
            }));
    }

    #[cfg(test)]
    async fn pending_remote_candidates(&self) -> usize {
        self.pending_remote.lock().await.len()
    }

    /// Closes the peer connection and all channels on it.
    pub async fn close(&self) -> Result<()> {
        self.peer_connection.close().await.map_err(|e| {
            ProtocolError::ConnectionClosed(format!("failed to close peer connection: {}", e))
        })
    }

    async fn local_description(&self, offer: bool) -> Result<SessionDescription> {
        let kind = if offer { "offer" } else { "answer" };
        let description = if offer {
            self.peer_connection.create_offer(None).await
        } else {
            self.peer_connection.create_answer(None).await
        }
        .map_err(|e| ProtocolError::NegotiationFailed(format!("failed to create {}: {}", kind, e)))?;

        let sdp = description.sdp.clone();
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|e| {
                ProtocolError::NegotiationFailed(format!("failed to set local description: {}", e))
            })?;

        Ok(if offer {
            SessionDescription::offer(sdp)
        } else {
            SessionDescription::answer(sdp)
        })
    }
}

impl NegotiationTransport for WebRtcTransport {
    fn create_offer(&self) -> Pin<Box<dyn Future<Output = Result<SessionDescription>> + Send + '_>> {
        Box::pin(self.local_description(true))
    }

    fn create_answer(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<SessionDescription>> + Send + '_>> {
        Box::pin(self.local_description(false))
    }

    fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let description = to_rtc_description(description)?;

            let mut pending = self.pending_remote.lock().await;
            self.peer_connection
                .set_remote_description(description)
                .await
                .map_err(|e| {
                    ProtocolError::NegotiationFailed(format!(
                        "failed to set remote description: {}",
                        e
                    ))
                })?;

            if !pending.is_empty() {
                tracing::debug!(count = pending.len(), "Applying buffered remote candidates");
            }
            for init in pending.drain(..) {
                if let Err(e) = self.peer_connection.add_ice_candidate(init).await {
                    tracing::warn!(error = %e, "Failed to apply buffered candidate");
                }
            }
            Ok(())
        })
    }

    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let init = RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            };

            let mut pending = self.pending_remote.lock().await;
            if self.peer_connection.remote_description().await.is_none() {
                pending.push(init);
                return Ok(());
            }

            self.peer_connection
                .add_ice_candidate(init)
                .await
                .map_err(|e| ProtocolError::NegotiationFailed(format!("failed to add candidate: {}", e)))
        })
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let result = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        other => {
            return Err(ProtocolError::NegotiationFailed(format!(
                "unsupported remote description type {:?}",
                other
            )))
        }
    };
    result.map_err(|e| ProtocolError::NegotiationFailed(format!("invalid description: {}", e)))
}

/// Forwards a data channel's traffic and announces it once open.
fn wire_channel(channel: Arc<RTCDataChannel>, events: mpsc::UnboundedSender<TransportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let message_tx = tx.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = message_tx.clone();
        Box::pin(async move {
            let payload = if msg.is_string {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => ChannelPayload::Text(text),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-UTF-8 text message");
                        return;
                    }
                }
            } else {
                ChannelPayload::Binary(msg.data)
            };
            let _ = tx.send(ChannelEvent::Message(payload));
        })
    }));

    channel.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            tracing::debug!("Files channel closed");
            let _ = tx.send(ChannelEvent::Closed);
        })
    }));

    // Whichever of on_open and the ready-state check runs first takes it.
    let slot = Arc::new(std::sync::Mutex::new(Some(ChannelReceiver::new(rx))));

    let open_slot = Arc::clone(&slot);
    let weak_channel = Arc::downgrade(&channel);
    let open_events = events.clone();
    channel.on_open(Box::new(move || {
        announce_open(&open_slot, &weak_channel, &open_events);
        Box::pin(async {})
    }));

    if channel.ready_state() == RTCDataChannelState::Open {
        announce_open(&slot, &Arc::downgrade(&channel), &events);
    }
}

fn announce_open(
    slot: &std::sync::Mutex<Option<ChannelReceiver>>,
    channel: &Weak<RTCDataChannel>,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    let receiver = match slot.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => None,
    };
    let (Some(receiver), Some(channel)) = (receiver, channel.upgrade()) else {
        return;
    };

    tracing::info!(label = %channel.label(), "Files channel open");
    let _ = events.send(TransportEvent::ChannelOpen {
        channel: Arc::new(WebRtcChannel { inner: channel }),
        receiver,
    });
}

/// The files data channel as a [`DataChannel`].
pub struct WebRtcChannel {
    inner: Arc<RTCDataChannel>,
}

impl WebRtcChannel {
    /// Closes the data channel.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await.map_err(|e| {
            ProtocolError::ConnectionClosed(format!("failed to close data channel: {}", e))
        })
    }
}

impl DataChannel for WebRtcChannel {
    fn send(
        &self,
        payload: ChannelPayload,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let result = match payload {
                ChannelPayload::Text(text) => self.inner.send_text(text).await,
                ChannelPayload::Binary(data) => self.inner.send(&data).await,
            };
            result.map(|_| ()).map_err(|e| {
                ProtocolError::TransferFailed(format!("data channel send failed: {}", e))
            })
        })
    }

    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move { self.inner.buffered_amount().await })
    }

    fn is_open(&self) -> bool {
        self.inner.ready_state() == RTCDataChannelState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;

    fn offline() -> WebRtcConfig {
        WebRtcConfig::default()
    }

    #[test]
    fn test_config_from_network_settings() {
        let network = NetworkConfig {
            stun_servers: vec!["stun:stun.example.com:3478".to_string()],
            turn_servers: vec![TurnServerConfig {
                url: "turn:relay.example.com:3478?transport=udp".to_string(),
                username: "drop".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };
        let config = WebRtcConfig::from(&network);
        assert_eq!(
            config.ice_servers,
            vec![
                IceServer::Stun("stun:stun.example.com:3478".to_string()),
                IceServer::Turn {
                    url: "turn:relay.example.com:3478?transport=udp".to_string(),
                    username: "drop".to_string(),
                    credential: "secret".to_string(),
                },
            ]
        );

        let rtc = config.to_rtc_configuration();
        assert_eq!(rtc.ice_servers.len(), 2);
        assert!(rtc.ice_servers[0].username.is_empty());
        assert_eq!(rtc.ice_servers[1].username, "drop");
        assert_eq!(rtc.ice_servers[1].credential, "secret");
    }

    #[tokio::test]
    async fn test_transport_accepts_turn_relay() {
        let network = NetworkConfig {
            stun_servers: Vec::new(),
            turn_servers: vec![TurnServerConfig {
                url: "turn:127.0.0.1:3478".to_string(),
                username: "drop".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };
        let (transport, _events) = WebRtcTransport::new(&WebRtcConfig::from(&network))
            .await
            .unwrap();
        transport.close().await.unwrap();
    }

    #[test]
    fn test_rollback_description_rejected() {
        let description = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(
            to_rtc_description(description),
            Err(ProtocolError::NegotiationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_create_offer_with_files_channel() {
        let (transport, _events) = WebRtcTransport::new(&offline()).await.unwrap();
        transport.open_channel().await.unwrap();

        let offer = transport.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("webrtc-datachannel"));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let (host, _host_events) = WebRtcTransport::new(&offline()).await.unwrap();
        let (joiner, _joiner_events) = WebRtcTransport::new(&offline()).await.unwrap();
        host.open_channel().await.unwrap();
        joiner.accept_channels();

        let offer = host.create_offer().await.unwrap();
        joiner.set_remote_description(offer).await.unwrap();
        let answer = joiner.create_answer().await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        host.set_remote_description(answer).await.unwrap();

        host.close().await.unwrap();
        joiner.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_candidates_buffered_until_description() {
        let (host, _host_events) = WebRtcTransport::new(&offline()).await.unwrap();
        let (joiner, _joiner_events) = WebRtcTransport::new(&offline()).await.unwrap();
        host.open_channel().await.unwrap();

        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        joiner.add_ice_candidate(candidate).await.unwrap();
        assert_eq!(joiner.pending_remote_candidates().await, 1);

        let offer = host.create_offer().await.unwrap();
        joiner.set_remote_description(offer).await.unwrap();
        assert_eq!(joiner.pending_remote_candidates().await, 0);

        host.close().await.unwrap();
        joiner.close().await.unwrap();
    }
}
