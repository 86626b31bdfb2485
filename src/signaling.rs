//! WebSocket signaling router pairing one broadcaster with its viewers

mod actor;
mod messages;
mod server;
mod types;

pub use actor::RoomManagerHandle;
pub use messages::{ClientMessage, RelayEnvelope, ServerMessage, Target};
pub use server::SignalingServer;
pub use types::{
    ClientId, ConnId, OutboundMessage, PeerSender, Role, RoomId, RoomSummary, SignalingError,
};
