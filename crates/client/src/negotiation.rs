//! Connection negotiation coordinator.
//!
//! Drives peer connection setup from discrete events: signaling messages
//! relayed by the rendezvous service, candidates gathered by the local
//! transport and transport state changes. The host creates the offer once a
//! peer joins; the joiner answers the offer it receives.
//!
//! ```text
//! Idle ─Start─▶ AwaitingPeer ─PeerJoined (host)──▶ OfferSent ─Answer─▶ Negotiating
//!                     │                                                    │
//!                     └──Offer (joiner)──▶ AnswerSent ───────────────────▶─┤
//!                                                                          ▼
//!                       any ─failure/teardown─▶ Closed ◀───────────── Connected
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use protocol::error::Result;
use protocol::signaling::{ClientMessage, IceCandidate, PeerId, SessionDescription};
use thiserror::Error;

/// Which side of the negotiation this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the room; sends the offer and opens the data channel.
    Host,
    /// Joined the room; answers the host's offer.
    Joiner,
}

/// Negotiation state for one remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    AwaitingPeer,
    OfferSent,
    AnswerSent,
    Negotiating,
    Connected,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::AwaitingPeer => "awaiting-peer",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::AnswerSent => "answer-sent",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Inputs to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// Local intent to host or join.
    Start,
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    OfferReceived {
        from: PeerId,
        offer: SessionDescription,
    },
    AnswerReceived {
        from: PeerId,
        answer: SessionDescription,
    },
    RemoteCandidate {
        from: PeerId,
        candidate: IceCandidate,
    },
    /// Candidate gathered by the local transport.
    LocalCandidate(IceCandidate),
    TransportConnected,
    TransportFailed(String),
    Teardown,
}

impl NegotiationEvent {
    fn kind(&self) -> &'static str {
        match self {
            NegotiationEvent::Start => "start",
            NegotiationEvent::PeerJoined(_) => "peer-joined",
            NegotiationEvent::PeerLeft(_) => "peer-left",
            NegotiationEvent::OfferReceived { .. } => "offer",
            NegotiationEvent::AnswerReceived { .. } => "answer",
            NegotiationEvent::RemoteCandidate { .. } => "remote-candidate",
            NegotiationEvent::LocalCandidate(_) => "local-candidate",
            NegotiationEvent::TransportConnected => "transport-connected",
            NegotiationEvent::TransportFailed(_) => "transport-failed",
            NegotiationEvent::Teardown => "teardown",
        }
    }
}

/// Negotiation failures. Each one closes the attempt it occurred in.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("unexpected {event} while {state}")]
    OutOfOrder {
        event: &'static str,
        state: NegotiationState,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signaling error: {0}")]
    Signaling(String),
}

/// Connection-establishment primitives of the peer transport.
pub trait NegotiationTransport: Send + Sync {
    /// Creates an offer and applies it as the local description.
    fn create_offer(&self) -> Pin<Box<dyn Future<Output = Result<SessionDescription>> + Send + '_>>;

    /// Creates an answer and applies it as the local description.
    fn create_answer(&self)
        -> Pin<Box<dyn Future<Output = Result<SessionDescription>> + Send + '_>>;

    /// Applies the remote peer's description.
    fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Applies a remote candidate. Candidates arriving before the remote
    /// description are buffered by the implementation.
    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Outbound path to the rendezvous service.
pub trait SignalingSink: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<()>;
}

/// Negotiation state machine for one remote peer.
pub struct Coordinator<T: NegotiationTransport, S: SignalingSink> {
    role: Role,
    state: NegotiationState,
    remote: Option<PeerId>,
    pending_local: Vec<IceCandidate>,
    transport: Arc<T>,
    signaling: Arc<S>,
}

impl<T: NegotiationTransport, S: SignalingSink> Coordinator<T, S> {
    pub fn new(role: Role, transport: Arc<T>, signaling: Arc<S>) -> Self {
        Self {
            role,
            state: NegotiationState::Idle,
            remote: None,
            pending_local: Vec::new(),
            transport,
            signaling,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Peer this negotiation is with, once known.
    pub fn remote_peer(&self) -> Option<&PeerId> {
        self.remote.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.state == NegotiationState::Closed
    }

    /// Applies one event and returns the resulting state.
    ///
    /// An error means the attempt was aborted; the state is then `Closed`.
    pub async fn handle(
        &mut self,
        event: NegotiationEvent,
    ) -> std::result::Result<NegotiationState, NegotiationError> {
        let kind = event.kind();
        let before = self.state;

        let outcome = self.apply(event).await;
        if let Err(err) = &outcome {
            tracing::warn!(role = ?self.role, state = %before, event = kind, error = %err, "Negotiation aborted");
            self.state = NegotiationState::Closed;
        } else if self.state != before {
            tracing::debug!(role = ?self.role, from = %before, to = %self.state, event = kind, "Negotiation state changed");
        }

        outcome.map(|_| self.state)
    }

    async fn apply(&mut self, event: NegotiationEvent) -> std::result::Result<(), NegotiationError> {
        use NegotiationState::*;

        if self.state == Closed {
            tracing::trace!(event = event.kind(), "Ignoring event after close");
            return Ok(());
        }

        match event {
            NegotiationEvent::Start => {
                if self.state == Idle {
                    self.state = AwaitingPeer;
                }
            }

            NegotiationEvent::PeerJoined(peer) => {
                if self.role != Role::Host || self.state != AwaitingPeer {
                    tracing::debug!(peer_id = %peer, state = %self.state, "Ignoring peer-joined");
                    return Ok(());
                }
                let offer = self
                    .transport
                    .create_offer()
                    .await
                    .map_err(|e| NegotiationError::Transport(e.to_string()))?;
                self.send(ClientMessage::Offer {
                    to: Some(peer.clone()),
                    offer,
                })?;
                self.remote = Some(peer);
                self.state = OfferSent;
                self.flush_local_candidates();
            }

            NegotiationEvent::OfferReceived { from, offer } => {
                if self.role != Role::Joiner || self.state != AwaitingPeer {
                    return Err(self.out_of_order("offer"));
                }
                self.transport
                    .set_remote_description(offer)
                    .await
                    .map_err(|e| NegotiationError::Transport(e.to_string()))?;
                let answer = self
                    .transport
                    .create_answer()
                    .await
                    .map_err(|e| NegotiationError::Transport(e.to_string()))?;
                self.send(ClientMessage::Answer {
                    to: Some(from.clone()),
                    answer,
                })?;
                self.remote = Some(from);
                self.state = AnswerSent;
                self.flush_local_candidates();
                self.state = Negotiating;
            }

            NegotiationEvent::AnswerReceived { from, answer } => {
                if self.state != OfferSent {
                    return Err(self.out_of_order("answer"));
                }
                if self.remote.as_ref() != Some(&from) {
                    tracing::debug!(peer_id = %from, "Ignoring answer from another peer");
                    return Ok(());
                }
                self.transport
                    .set_remote_description(answer)
                    .await
                    .map_err(|e| NegotiationError::Transport(e.to_string()))?;
                self.state = Negotiating;
            }

            NegotiationEvent::RemoteCandidate { from, candidate } => {
                if self.remote.as_ref() != Some(&from) {
                    tracing::debug!(peer_id = %from, state = %self.state, "Ignoring candidate from unknown peer");
                    return Ok(());
                }
                if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                    tracing::warn!(peer_id = %from, error = %e, "Failed to apply remote candidate");
                }
            }

            NegotiationEvent::LocalCandidate(candidate) => {
                if self.remote.is_some() {
                    self.send_candidate(candidate);
                } else {
                    self.pending_local.push(candidate);
                }
            }

            NegotiationEvent::TransportConnected => {
                if matches!(self.state, Negotiating | OfferSent | AnswerSent) {
                    self.state = Connected;
                }
            }

            NegotiationEvent::TransportFailed(reason) => {
                tracing::warn!(reason = %reason, "Peer transport failed");
                self.state = Closed;
            }

            NegotiationEvent::PeerLeft(peer) => {
                if self.remote.as_ref() == Some(&peer) && self.state != Connected {
                    tracing::info!(peer_id = %peer, "Peer left during negotiation");
                    self.state = Closed;
                }
            }

            NegotiationEvent::Teardown => {
                self.state = Closed;
            }
        }

        Ok(())
    }

    fn out_of_order(&self, event: &'static str) -> NegotiationError {
        NegotiationError::OutOfOrder {
            event,
            state: self.state,
        }
    }

    fn send(&self, message: ClientMessage) -> std::result::Result<(), NegotiationError> {
        self.signaling
            .send(message)
            .map_err(|e| NegotiationError::Signaling(e.to_string()))
    }

    fn send_candidate(&self, candidate: IceCandidate) {
        let message = ClientMessage::IceCandidate {
            to: self.remote.clone(),
            candidate,
        };
        if let Err(e) = self.signaling.send(message) {
            tracing::warn!(error = %e, "Failed to send local candidate");
        }
    }

    fn flush_local_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.pending_local) {
            self.send_candidate(candidate);
        }
    }
}
