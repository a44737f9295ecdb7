//! Room and peer registry.
//!
//! The registry is the single authority over rendezvous state: which peers are
//! connected, which rooms exist and who is in them. It never performs I/O.
//! Every operation mutates state synchronously and returns the list of
//! messages that must be delivered as a result, so the caller decides how and
//! when deliveries happen.
//!
//! Invariants maintained here:
//! - a room with zero members does not exist
//! - a peer is a member of at most one room, and its record names that room
//! - a failed operation leaves rooms untouched

use std::collections::HashMap;

use protocol::signaling::{
    ClientMessage, PeerId, RelayRequest, RoomCode, ServerMessage,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

/// Default bound on room code regeneration attempts.
pub const DEFAULT_MAX_CODE_ATTEMPTS: usize = 1000;

/// Message reported to requesters when an internal fault occurs.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Errors raised by registry operations.
///
/// Routing errors are reported to the requester verbatim. Service faults are
/// logged and answered with a generic message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("room not found")]
    RoomNotFound { code: RoomCode },

    #[error("recipient {peer} is not connected")]
    RecipientNotConnected { peer: PeerId },

    #[error("recipient {peer} is not in your room")]
    RecipientNotInRoom { peer: PeerId },

    #[error("could not allocate a room code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    #[error("registry inconsistency: {0}")]
    Inconsistent(String),
}

impl RegistryError {
    /// Returns true for faults internal to the service rather than caused by
    /// the request.
    pub fn is_service_fault(&self) -> bool {
        matches!(
            self,
            RegistryError::CodeSpaceExhausted { .. } | RegistryError::Inconsistent(_)
        )
    }

    /// Text sent back to the requester.
    pub fn client_message(&self) -> String {
        if self.is_service_fault() {
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// A message addressed to one connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PeerId,
    pub message: ServerMessage,
}

impl Outbound {
    fn new(to: PeerId, message: ServerMessage) -> Self {
        Self { to, message }
    }
}

#[derive(Debug, Default)]
struct PeerRecord {
    room: Option<RoomCode>,
}

#[derive(Debug)]
struct Room {
    /// Members in join order.
    members: Vec<PeerId>,
}

impl Room {
    fn others(&self, peer: &PeerId) -> Vec<PeerId> {
        self.members.iter().filter(|m| *m != peer).cloned().collect()
    }

    fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }
}

/// Room and peer registry.
pub struct Registry {
    peers: HashMap<PeerId, PeerRecord>,
    rooms: HashMap<RoomCode, Room>,
    rng: StdRng,
    max_code_attempts: usize,
}

impl Registry {
    /// Creates an empty registry seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates an empty registry using the given random source for room codes.
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            peers: HashMap::new(),
            rooms: HashMap::new(),
            rng,
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
        }
    }

    /// Sets the bound on room code regeneration attempts.
    pub fn with_max_code_attempts(mut self, attempts: usize) -> Self {
        self.max_code_attempts = attempts;
        self
    }

    /// Registers a newly connected peer and announces its identifier.
    pub fn connect(&mut self) -> (PeerId, Vec<Outbound>) {
        let mut peer_id = PeerId::generate();
        while self.peers.contains_key(&peer_id) {
            peer_id = PeerId::generate();
        }

        self.peers.insert(peer_id.clone(), PeerRecord::default());
        tracing::debug!(peer_id = %peer_id, "Peer connected");

        let out = vec![Outbound::new(
            peer_id.clone(),
            ServerMessage::PeerId {
                peer_id: peer_id.clone(),
            },
        )];
        (peer_id, out)
    }

    /// Creates a room with `peer` as its only member.
    ///
    /// A peer already in a room leaves it first.
    pub fn create_room(&mut self, peer: &PeerId) -> Vec<Outbound> {
        if !self.peers.contains_key(peer) {
            tracing::warn!(peer_id = %peer, "create-room from unknown peer");
            return Vec::new();
        }

        let code = match self.allocate_code() {
            Ok(code) => code,
            Err(e) => return self.reject(peer, e),
        };

        let mut out = self.leave_room(peer);

        self.rooms.insert(
            code.clone(),
            Room {
                members: vec![peer.clone()],
            },
        );
        if let Some(record) = self.peers.get_mut(peer) {
            record.room = Some(code.clone());
        }

        tracing::info!(peer_id = %peer, room = %code, "Room created");
        out.push(Outbound::new(
            peer.clone(),
            ServerMessage::RoomCreated { room_id: code },
        ));
        out
    }

    /// Adds `peer` to the room named by `code`.
    ///
    /// The code is normalized before lookup. An unknown code is reported to
    /// the requester and changes nothing.
    pub fn join_room(&mut self, peer: &PeerId, code: &RoomCode) -> Vec<Outbound> {
        let current = match self.peers.get(peer) {
            Some(record) => record.room.clone(),
            None => {
                tracing::warn!(peer_id = %peer, "join-room from unknown peer");
                return Vec::new();
            }
        };

        let code = RoomCode::normalize(code.as_str());
        if !self.rooms.contains_key(&code) {
            tracing::debug!(peer_id = %peer, room = %code, "Join for unknown room");
            return self.reject(peer, RegistryError::RoomNotFound { code });
        }

        if current.as_ref() == Some(&code) {
            let peers = self
                .rooms
                .get(&code)
                .map(|room| room.others(peer))
                .unwrap_or_default();
            return vec![Outbound::new(
                peer.clone(),
                ServerMessage::RoomJoined {
                    room_id: code,
                    peers,
                },
            )];
        }

        let mut out = self.leave_room(peer);

        let Some(room) = self.rooms.get_mut(&code) else {
            // Leaving cannot delete a room the peer was not in.
            let err = RegistryError::Inconsistent(format!("room {code} vanished during join"));
            out.extend(self.reject(peer, err));
            return out;
        };

        let existing = room.members.clone();
        room.members.push(peer.clone());
        if let Some(record) = self.peers.get_mut(peer) {
            record.room = Some(code.clone());
        }

        tracing::info!(
            peer_id = %peer,
            room = %code,
            members = existing.len() + 1,
            "Peer joined room"
        );

        out.push(Outbound::new(
            peer.clone(),
            ServerMessage::RoomJoined {
                room_id: code,
                peers: existing.clone(),
            },
        ));
        out.extend(existing.into_iter().map(|member| {
            Outbound::new(
                member,
                ServerMessage::PeerJoined {
                    peer_id: peer.clone(),
                },
            )
        }));
        out
    }

    /// Removes `peer` from its current room. Idempotent.
    pub fn leave_room(&mut self, peer: &PeerId) -> Vec<Outbound> {
        let Some(code) = self.peers.get_mut(peer).and_then(|r| r.room.take()) else {
            return Vec::new();
        };

        let Some(room) = self.rooms.get_mut(&code) else {
            let err = RegistryError::Inconsistent(format!(
                "peer {peer} recorded in missing room {code}"
            ));
            tracing::error!(error = %err, "Service fault while leaving room");
            return Vec::new();
        };

        room.members.retain(|m| m != peer);

        if room.members.is_empty() {
            self.rooms.remove(&code);
            tracing::info!(peer_id = %peer, room = %code, "Room closed");
            return Vec::new();
        }

        tracing::info!(
            peer_id = %peer,
            room = %code,
            remaining = room.members.len(),
            "Peer left room"
        );

        room.members
            .iter()
            .map(|member| {
                Outbound::new(
                    member.clone(),
                    ServerMessage::PeerLeft {
                        peer_id: peer.clone(),
                    },
                )
            })
            .collect()
    }

    /// Relays a negotiation payload from `from`, stamped with its id.
    ///
    /// Senders outside any room are silently dropped. An explicit recipient
    /// must be connected and share the sender's room.
    pub fn relay(&mut self, from: &PeerId, request: RelayRequest) -> Vec<Outbound> {
        let Some(record) = self.peers.get(from) else {
            tracing::warn!(peer_id = %from, "relay from unknown peer");
            return Vec::new();
        };

        let Some(code) = record.room.clone() else {
            tracing::debug!(
                peer_id = %from,
                kind = request.payload.kind(),
                "Dropping relay from peer outside a room"
            );
            return Vec::new();
        };

        let Some(room) = self.rooms.get(&code) else {
            let err = RegistryError::Inconsistent(format!(
                "peer {from} recorded in missing room {code}"
            ));
            return self.reject(from, err);
        };

        let kind = request.payload.kind();
        match request.to {
            Some(target) => {
                if !self.peers.contains_key(&target) {
                    return self.reject(from, RegistryError::RecipientNotConnected { peer: target });
                }
                if !room.contains(&target) {
                    return self.reject(from, RegistryError::RecipientNotInRoom { peer: target });
                }

                tracing::debug!(from = %from, to = %target, kind, "Relaying to peer");
                vec![Outbound::new(target, request.payload.stamp(from.clone()))]
            }
            None => {
                let recipients = room.others(from);
                tracing::debug!(
                    from = %from,
                    room = %code,
                    recipients = recipients.len(),
                    kind,
                    "Broadcasting to room"
                );
                let message = request.payload.stamp(from.clone());
                recipients
                    .into_iter()
                    .map(|member| Outbound::new(member, message.clone()))
                    .collect()
            }
        }
    }

    /// Removes `peer` from its room and forgets it.
    pub fn disconnect(&mut self, peer: &PeerId) -> Vec<Outbound> {
        let out = self.leave_room(peer);
        if self.peers.remove(peer).is_some() {
            tracing::debug!(peer_id = %peer, "Peer disconnected");
        }
        out
    }

    /// Dispatches a decoded client message.
    pub fn handle(&mut self, from: &PeerId, message: ClientMessage) -> Vec<Outbound> {
        match message {
            ClientMessage::CreateRoom => self.create_room(from),
            ClientMessage::JoinRoom { room_id } => self.join_room(from, &room_id),
            ClientMessage::LeaveRoom => self.leave_room(from),
            negotiation => match negotiation.into_relay() {
                Some(request) => self.relay(from, request),
                None => Vec::new(),
            },
        }
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Members of a room in join order.
    pub fn room_members(&self, code: &RoomCode) -> Option<Vec<PeerId>> {
        self.rooms.get(code).map(|room| room.members.clone())
    }

    /// The room a peer is currently in.
    pub fn room_of(&self, peer: &PeerId) -> Option<RoomCode> {
        self.peers.get(peer).and_then(|record| record.room.clone())
    }

    /// Whether a peer is currently connected.
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    fn allocate_code(&mut self) -> Result<RoomCode, RegistryError> {
        for _ in 0..self.max_code_attempts {
            let code = RoomCode::generate(&mut self.rng);
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(RegistryError::CodeSpaceExhausted {
            attempts: self.max_code_attempts,
        })
    }

    fn reject(&self, peer: &PeerId, err: RegistryError) -> Vec<Outbound> {
        if err.is_service_fault() {
            tracing::error!(peer_id = %peer, error = %err, "Service fault");
        }
        vec![Outbound::new(peer.clone(), ServerMessage::error(err.client_message()))]
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
