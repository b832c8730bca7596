//! Messages exchanged with the signaling relay.
//!
//! Each message travels as one JSON object per line. The relay reads only the
//! envelope (`type`, `from`, `to`); `payload` is opaque to it.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalingMessage {
    /// Binds the sending connection to `peer_id`.
    Register {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    /// Receiver asks the sender for its offer.
    RequestOffer { from: String, to: String },
    Offer {
        from: String,
        to: String,
        payload: String,
    },
    Answer {
        from: String,
        to: String,
        payload: String,
    },
    IceCandidate {
        from: String,
        to: String,
        payload: String,
    },
}

impl SignalingMessage {
    /// Destination peer, `None` for `register`.
    pub fn to(&self) -> Option<&str> {
        match self {
            SignalingMessage::Register { .. } => None,
            SignalingMessage::RequestOffer { to, .. }
            | SignalingMessage::Offer { to, .. }
            | SignalingMessage::Answer { to, .. }
            | SignalingMessage::IceCandidate { to, .. } => Some(to),
        }
    }

    /// Originating peer, `None` for `register`.
    pub fn from(&self) -> Option<&str> {
        match self {
            SignalingMessage::Register { .. } => None,
            SignalingMessage::RequestOffer { from, .. }
            | SignalingMessage::Offer { from, .. }
            | SignalingMessage::Answer { from, .. }
            | SignalingMessage::IceCandidate { from, .. } => Some(from),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Register { .. } => "register",
            SignalingMessage::RequestOffer { .. } => "requestOffer",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "iceCandidate",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}
