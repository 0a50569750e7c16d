//! Signaling envelope types and parser.
//!
//! The relay carries JSON envelopes of the shape
//! `{"type": "<kind>", "room_id": ..., "peer_id": ..., ...}`. SDP and ICE
//! structures are forwarded as produced by the peer connection; this
//! layer does not interpret them.

use serde::{Deserialize, Serialize};

/// All signaling envelopes exchanged through the relay.
///
/// `peer_id` is always the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Sent when entering a room.
    Join { room_id: String, peer_id: String },

    /// Sent when leaving a room.
    Leave { room_id: String, peer_id: String },

    /// Relayed by the server when another peer enters the room.
    PeerJoined { room_id: String, peer_id: String },

    Offer {
        room_id: String,
        peer_id: String,
        sdp: String,
    },

    Answer {
        room_id: String,
        peer_id: String,
        sdp: String,
    },

    IceCandidate {
        room_id: String,
        peer_id: String,
        candidate: IceCandidate,
    },
}

impl SignalMessage {
    pub fn room_id(&self) -> &str {
        match self {
            SignalMessage::Join { room_id, .. }
            | SignalMessage::Leave { room_id, .. }
            | SignalMessage::PeerJoined { room_id, .. }
            | SignalMessage::Offer { room_id, .. }
            | SignalMessage::Answer { room_id, .. }
            | SignalMessage::IceCandidate { room_id, .. } => room_id,
        }
    }

    pub fn peer_id(&self) -> &str {
        match self {
            SignalMessage::Join { peer_id, .. }
            | SignalMessage::Leave { peer_id, .. }
            | SignalMessage::PeerJoined { peer_id, .. }
            | SignalMessage::Offer { peer_id, .. }
            | SignalMessage::Answer { peer_id, .. }
            | SignalMessage::IceCandidate { peer_id, .. } => peer_id,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Join { .. } => "join",
            SignalMessage::Leave { .. } => "leave",
            SignalMessage::PeerJoined { .. } => "peer-joined",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// `RTCIceCandidateInit`, spelled the way browsers serialize it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// Parse a signaling text frame.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log and continue.
pub fn parse_message(text: &str) -> Result<SignalMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode_message(message: &SignalMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
