//! Signaling messages exchanged between peers and the rendezvous service.
//!
//! All messages are JSON objects with a kebab-case `type` tag and camelCase
//! fields. The set of kinds is closed: a payload with an unknown `type`
//! fails to deserialize instead of falling through to a default branch.
//!
//! Negotiation payloads (offers, answers, candidates) are opaque to the
//! rendezvous service. It only stamps them with the sender's peer id on relay.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characters used for room codes. Excludes `I`, `O`, `0` and `1`.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of characters in a room code.
pub const ROOM_CODE_LENGTH: usize = 6;

/// Opaque identifier assigned to a peer by the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generates a fresh random peer identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short human-shareable room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generates a random code of [`ROOM_CODE_LENGTH`] characters from
    /// [`ROOM_CODE_ALPHABET`].
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..ROOM_CODE_LENGTH)
            .map(|_| {
                let idx = rng.gen_range(0..ROOM_CODE_ALPHABET.len());
                ROOM_CODE_ALPHABET[idx] as char
            })
            .collect();
        Self(code)
    }

    /// Normalizes user input into a code suitable for lookup.
    ///
    /// Surrounding whitespace is trimmed and letters are upper-cased. The
    /// alphabet is not enforced here, so a mistyped code simply fails to match.
    pub fn normalize(input: &str) -> Self {
        Self(input.trim().to_ascii_uppercase())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description exchanged during negotiation.
///
/// Shaped like the browser's `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    /// Creates an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Creates an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate, shaped like the browser's `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

// ---------------------------------------------------------------------------
// Client → rendezvous service
// ---------------------------------------------------------------------------

/// Messages sent by a peer to the rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Create a new room with the sender as its only member.
    CreateRoom,
    /// Join an existing room by code.
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomCode,
    },
    /// Leave the current room.
    LeaveRoom,
    /// Negotiation offer for one peer or the whole room.
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<PeerId>,
        offer: SessionDescription,
    },
    /// Negotiation answer for one peer or the whole room.
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<PeerId>,
        answer: SessionDescription,
    },
    /// Connectivity candidate for one peer or the whole room.
    IceCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<PeerId>,
        candidate: IceCandidate,
    },
}

/// Negotiation payload carried through the relay untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl NegotiationPayload {
    /// Builds the relayed message, stamped with the sender's peer id.
    pub fn stamp(self, from: PeerId) -> ServerMessage {
        match self {
            NegotiationPayload::Offer(offer) => ServerMessage::Offer { from, offer },
            NegotiationPayload::Answer(answer) => ServerMessage::Answer { from, answer },
            NegotiationPayload::IceCandidate(candidate) => {
                ServerMessage::IceCandidate { from, candidate }
            }
        }
    }

    /// Returns the wire kind of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            NegotiationPayload::Offer(_) => "offer",
            NegotiationPayload::Answer(_) => "answer",
            NegotiationPayload::IceCandidate(_) => "ice-candidate",
        }
    }
}

/// Relay instruction: optional explicit recipient plus the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub to: Option<PeerId>,
    pub payload: NegotiationPayload,
}

impl ClientMessage {
    /// Splits a negotiation message into a relay request.
    ///
    /// Returns `None` for room-management messages.
    pub fn into_relay(self) -> Option<RelayRequest> {
        match self {
            ClientMessage::Offer { to, offer } => Some(RelayRequest {
                to,
                payload: NegotiationPayload::Offer(offer),
            }),
            ClientMessage::Answer { to, answer } => Some(RelayRequest {
                to,
                payload: NegotiationPayload::Answer(answer),
            }),
            ClientMessage::IceCandidate { to, candidate } => Some(RelayRequest {
                to,
                payload: NegotiationPayload::IceCandidate(candidate),
            }),
            ClientMessage::CreateRoom | ClientMessage::JoinRoom { .. } | ClientMessage::LeaveRoom => {
                None
            }
        }
    }

    /// Encodes the message as JSON text.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message from JSON text.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Rendezvous service → client
// ---------------------------------------------------------------------------

/// Messages sent by the rendezvous service to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Identifier assigned to this connection.
    PeerId {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    /// A room was created for the requester.
    RoomCreated {
        #[serde(rename = "roomId")]
        room_id: RoomCode,
    },
    /// The requester joined a room; `peers` lists the other members.
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: RoomCode,
        peers: Vec<PeerId>,
    },
    /// Another peer joined the requester's room.
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    /// Another peer left the requester's room.
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },
    /// Relayed offer.
    Offer {
        from: PeerId,
        offer: SessionDescription,
    },
    /// Relayed answer.
    Answer {
        from: PeerId,
        answer: SessionDescription,
    },
    /// Relayed connectivity candidate.
    IceCandidate {
        from: PeerId,
        candidate: IceCandidate,
    },
    /// Request failed.
    Error { message: String },
}

impl ServerMessage {
    /// Creates an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Encodes the message as JSON text.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message from JSON text.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_room_code_generation_uses_alphabet() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let code = RoomCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), ROOM_CODE_LENGTH);
            assert!(code
                .as_str()
                .bytes()
                .all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_room_code_alphabet_excludes_ambiguous() {
        for ambiguous in [b'I', b'O', b'0', b'1'] {
            assert!(!ROOM_CODE_ALPHABET.contains(&ambiguous));
        }
    }

    #[test]
    fn test_room_code_normalize() {
        assert_eq!(RoomCode::normalize("  abc23z "), RoomCode::from("ABC23Z"));
        assert_eq!(RoomCode::normalize("FAKEID"), RoomCode::from("FAKEID"));
    }

    #[test]
    fn test_client_message_serialization() {
        let json = ClientMessage::CreateRoom.to_json().unwrap();
        assert_eq!(json, r#"{"type":"create-room"}"#);

        let json = ClientMessage::JoinRoom {
            room_id: RoomCode::from("ABC234"),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"join-room","roomId":"ABC234"}"#);

        let json = ClientMessage::Offer {
            to: None,
            offer: SessionDescription::offer("v=0"),
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""type":"offer""#));
        assert!(!json.contains(r#""to""#));
        assert!(json.contains(r#""offer":{"type":"offer","sdp":"v=0"}"#));
    }

    #[test]
    fn test_client_message_deserialization() {
        let msg = ClientMessage::from_json(r#"{"type":"create-room"}"#).unwrap();
        assert_eq!(msg, ClientMessage::CreateRoom);

        let msg = ClientMessage::from_json(r#"{"type":"leave-room"}"#).unwrap();
        assert_eq!(msg, ClientMessage::LeaveRoom);

        let msg = ClientMessage::from_json(
            r#"{"type":"ice-candidate","to":"peer-2","candidate":{"candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::IceCandidate { to, candidate } => {
                assert_eq!(to, Some(PeerId::from("peer-2")));
                assert_eq!(candidate.candidate, "candidate:1");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert!(candidate.username_fragment.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = ClientMessage::from_json(r#"{"type":"self-destruct"}"#);
        assert!(matches!(
            result,
            Err(crate::ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_into_relay() {
        let relay = ClientMessage::Answer {
            to: Some(PeerId::from("host")),
            answer: SessionDescription::answer("v=0"),
        }
        .into_relay()
        .unwrap();
        assert_eq!(relay.to, Some(PeerId::from("host")));
        assert_eq!(relay.payload.kind(), "answer");

        assert!(ClientMessage::CreateRoom.into_relay().is_none());
        assert!(ClientMessage::LeaveRoom.into_relay().is_none());
    }

    #[test]
    fn test_stamp_sets_sender() {
        let stamped = NegotiationPayload::Offer(SessionDescription::offer("v=0"))
            .stamp(PeerId::from("sender"));
        let json = stamped.to_json().unwrap();
        assert!(json.contains(r#""type":"offer""#));
        assert!(json.contains(r#""from":"sender""#));
    }

    #[test]
    fn test_server_message_shapes() {
        let json = ServerMessage::RoomJoined {
            room_id: RoomCode::from("ABC234"),
            peers: vec![PeerId::from("a")],
        }
        .to_json()
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"room-joined","roomId":"ABC234","peers":["a"]}"#
        );

        let json = ServerMessage::PeerId {
            peer_id: PeerId::from("p-1"),
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"peer-id","peerId":"p-1"}"#);

        let msg = ServerMessage::from_json(r#"{"type":"error","message":"room not found"}"#)
            .unwrap();
        assert_eq!(msg, ServerMessage::error("room not found"));
    }
}
