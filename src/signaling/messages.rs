use serde::{Deserialize, Serialize};

use super::types::{ClientId, Role, RoomId};

/// Messages sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Take a broadcaster or viewer slot in a room, creating the room if needed
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "roomId")]
        room_id: RoomId,
        role: Role,
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },

    #[serde(rename = "offer")]
    Offer(RelayEnvelope),

    #[serde(rename = "answer")]
    Answer(RelayEnvelope),

    #[serde(rename = "ice-candidate")]
    IceCandidate(RelayEnvelope),

    /// Any other `type`; ignored
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Addressing of a handshake message, `None` for everything else.
    pub fn envelope(&self) -> Option<&RelayEnvelope> {
        match self {
            ClientMessage::Offer(env)
            | ClientMessage::Answer(env)
            | ClientMessage::IceCandidate(env) => Some(env),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Offer(_) => "offer",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::IceCandidate(_) => "ice-candidate",
            ClientMessage::Unknown => "unknown",
        }
    }
}

/// Routing fields of an offer, answer or ice-candidate.
///
/// The handshake payload itself is never decoded; the router forwards the
/// frame it received unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayEnvelope {
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
    pub to: Target,
    #[serde(rename = "viewerId", default)]
    pub viewer_id: Option<ClientId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Broadcaster,
    Viewer,
    #[serde(other)]
    Other,
}

/// Messages sent from server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "joined")]
    Joined { role: Role },

    /// Sent to the broadcaster when a viewer joins its room
    #[serde(rename = "viewer-connected")]
    ViewerConnected {
        #[serde(rename = "viewerId")]
        viewer_id: ClientId,
    },

    #[serde(rename = "viewer-disconnected")]
    ViewerDisconnected {
        #[serde(rename = "viewerId")]
        viewer_id: ClientId,
    },

    /// Sent to every viewer of a room whose broadcaster left
    #[serde(rename = "broadcaster-disconnected")]
    BroadcasterDisconnected,
}
