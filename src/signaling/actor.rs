use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::messages::{RelayEnvelope, ServerMessage, Target};
use super::types::{
    ClientId, ConnId, Member, Membership, OutboundMessage, PeerSender, Role, Room, RoomId,
    RoomSummary, SignalingError,
};

/// Commands sent to the room manager actor
pub(crate) enum RoomCommand {
    Connect {
        conn: ConnId,
        tx: PeerSender,
    },
    Join {
        conn: ConnId,
        room_id: RoomId,
        role: Role,
        client_id: ClientId,
    },
    Relay {
        conn: ConnId,
        kind: &'static str,
        envelope: RelayEnvelope,
        raw: OutboundMessage,
    },
    Disconnect {
        conn: ConnId,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
}

struct PeerEntry {
    tx: PeerSender,
    membership: Option<Membership>,
}

/// The room table plus every live connection's outbound queue.
///
/// Owned by exactly one task; nothing here awaits, so each command is applied
/// atomically with respect to every other connection.
#[derive(Default)]
pub(crate) struct RoomManager {
    rooms: HashMap<RoomId, Room>,
    peers: HashMap<ConnId, PeerEntry>,
}

impl RoomManager {
    pub fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Connect { conn, tx } => self.connect(conn, tx),

            RoomCommand::Join {
                conn,
                room_id,
                role,
                client_id,
            } => {
                if let Err(e) = self.join(conn, room_id, role, client_id) {
                    warn!("Join from {} failed: {}", conn, e);
                }
            }

            RoomCommand::Relay {
                conn,
                kind,
                envelope,
                raw,
            } => match self.relay(conn, kind, &envelope, raw) {
                Ok(()) => {}
                Err(e @ SignalingError::UnknownRoom(_)) => {
                    warn!("Dropping {} from {}: {}", kind, conn, e)
                }
                Err(e) => debug!("Dropping {} from {}: {}", kind, conn, e),
            },

            RoomCommand::Disconnect { conn } => self.disconnect(conn),

            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    pub fn connect(&mut self, conn: ConnId, tx: PeerSender) {
        self.peers.insert(
            conn,
            PeerEntry {
                tx,
                membership: None,
            },
        );
        debug!("Connection {} registered", conn);
    }

    pub fn join(
        &mut self,
        conn: ConnId,
        room_id: RoomId,
        role: Role,
        client_id: ClientId,
    ) -> Result<(), SignalingError> {
        let previous = match self.peers.get_mut(&conn) {
            Some(peer) => peer.membership.take(),
            None => {
                return Err(SignalingError::Internal(format!(
                    "connection {} is not registered",
                    conn
                )));
            }
        };
        if let Some(previous) = previous {
            self.release(conn, previous);
        }

        let room = self.rooms.entry(room_id.clone()).or_default();
        let displaced = match role {
            Role::Broadcaster => room
                .broadcaster
                .replace(Member {
                    conn,
                    client_id: client_id.clone(),
                })
                .map(|prev| prev.conn),
            Role::Viewer => room.viewers.insert(client_id.clone(), conn),
        };
        let broadcaster = room.broadcaster.as_ref().map(|b| b.conn);

        if let Some(displaced) = displaced.filter(|d| *d != conn) {
            if let Some(peer) = self.peers.get_mut(&displaced) {
                peer.membership = None;
            }
            info!(
                "{} {} in room {} replaced by {}",
                role, client_id, room_id, conn
            );
        }

        if let Some(peer) = self.peers.get_mut(&conn) {
            peer.membership = Some(Membership {
                room_id: room_id.clone(),
                role,
                client_id: client_id.clone(),
            });
        }
        info!("{} {} joined room {}", role, client_id, room_id);

        self.notify(conn, &ServerMessage::Joined { role });
        if role == Role::Viewer {
            if let Some(broadcaster) = broadcaster {
                self.notify(
                    broadcaster,
                    &ServerMessage::ViewerConnected {
                        viewer_id: client_id,
                    },
                );
            }
        }

        Ok(())
    }

    /// Forward a handshake frame unchanged to the peer its envelope names.
    pub fn relay(
        &self,
        conn: ConnId,
        kind: &str,
        envelope: &RelayEnvelope,
        raw: OutboundMessage,
    ) -> Result<(), SignalingError> {
        let room = self
            .rooms
            .get(&envelope.room_id)
            .ok_or_else(|| SignalingError::UnknownRoom(envelope.room_id.clone()))?;

        let target = match envelope.to {
            Target::Broadcaster => room.broadcaster.as_ref().map(|b| b.conn).ok_or_else(|| {
                SignalingError::UnknownPeer("broadcaster".to_string(), envelope.room_id.clone())
            })?,
            Target::Viewer => {
                let viewer_id = envelope.viewer_id.as_ref();
                viewer_id
                    .and_then(|id| room.viewers.get(id))
                    .copied()
                    .ok_or_else(|| {
                        let name = viewer_id.map(ClientId::as_str).unwrap_or("<unset>");
                        SignalingError::UnknownPeer(
                            format!("viewer {}", name),
                            envelope.room_id.clone(),
                        )
                    })?
            }
            Target::Other => {
                return Err(SignalingError::UnknownPeer(
                    "recipient".to_string(),
                    envelope.room_id.clone(),
                ));
            }
        };

        debug!(
            "Forwarding {} from {} to {} in room {}",
            kind, conn, target, envelope.room_id
        );
        self.deliver(target, raw)
    }

    pub fn disconnect(&mut self, conn: ConnId) {
        let Some(peer) = self.peers.remove(&conn) else {
            return;
        };
        if let Some(membership) = peer.membership {
            self.release(conn, membership);
        }
        debug!("Connection {} unregistered", conn);
    }

    /// Vacate the slot `conn` holds, notify the other side, drop the room if
    /// nobody is left in it.
    fn release(&mut self, conn: ConnId, membership: Membership) {
        let Membership {
            room_id,
            role,
            client_id,
        } = membership;
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        let mut outbox: Vec<(ConnId, ServerMessage)> = Vec::new();
        match role {
            Role::Broadcaster => {
                if room.broadcaster.as_ref().is_some_and(|b| b.conn == conn) {
                    room.broadcaster = None;
                    info!("Broadcaster {} left room {}", client_id, room_id);
                    outbox.extend(
                        room.viewers
                            .values()
                            .map(|v| (*v, ServerMessage::BroadcasterDisconnected)),
                    );
                }
            }
            Role::Viewer => {
                if room.viewers.get(&client_id) == Some(&conn) {
                    room.viewers.remove(&client_id);
                    info!("Viewer {} left room {}", client_id, room_id);
                    if let Some(broadcaster) = &room.broadcaster {
                        outbox.push((
                            broadcaster.conn,
                            ServerMessage::ViewerDisconnected {
                                viewer_id: client_id,
                            },
                        ));
                    }
                }
            }
        }

        if room.is_empty() {
            self.rooms.remove(&room_id);
            info!("Room {} removed (empty)", room_id);
        }

        for (target, msg) in outbox {
            self.notify(target, &msg);
        }
    }

    pub fn snapshot(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(room_id, room)| {
                let mut viewers: Vec<ClientId> = room.viewers.keys().cloned().collect();
                viewers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                RoomSummary {
                    room_id: room_id.clone(),
                    broadcaster: room.broadcaster.as_ref().map(|b| b.client_id.clone()),
                    viewers,
                }
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.as_str().cmp(b.room_id.as_str()));
        rooms
    }

    fn deliver(&self, target: ConnId, msg: OutboundMessage) -> Result<(), SignalingError> {
        self.peers
            .get(&target)
            .ok_or(SignalingError::SendFailure(target))?
            .tx
            .send(msg)
            .map_err(|_| SignalingError::SendFailure(target))
    }

    fn notify(&self, target: ConnId, msg: &ServerMessage) {
        let result = serde_json::to_string(msg)
            .map_err(|e| SignalingError::Internal(e.to_string()))
            .and_then(|json| self.deliver(target, OutboundMessage::from(json)));
        if let Err(e) = result {
            debug!("Notification to {} dropped: {}", target, e);
        }
    }
}

pub(crate) async fn room_manager_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut manager = RoomManager::default();

    while let Some(cmd) = rx.recv().await {
        manager.handle(cmd);
    }
}

/// Handle to communicate with the room manager actor
#[derive(Clone)]
pub struct RoomManagerHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RoomManagerHandle {
    /// Spawn the actor on the current runtime and return a handle to it
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(1024);
        tokio::spawn(room_manager_actor(rx));
        Self { tx }
    }

    /// Register a connection's outbound queue
    pub async fn connect(&self, conn: ConnId, tx: PeerSender) {
        let _ = self.tx.send(RoomCommand::Connect { conn, tx }).await;
    }

    /// Join a room as broadcaster or viewer
    pub async fn join(&self, conn: ConnId, room_id: RoomId, role: Role, client_id: ClientId) {
        let _ = self
            .tx
            .send(RoomCommand::Join {
                conn,
                room_id,
                role,
                client_id,
            })
            .await;
    }

    /// Forward a handshake frame to the addressed peer
    pub async fn relay(
        &self,
        conn: ConnId,
        kind: &'static str,
        envelope: RelayEnvelope,
        raw: OutboundMessage,
    ) {
        let _ = self
            .tx
            .send(RoomCommand::Relay {
                conn,
                kind,
                envelope,
                raw,
            })
            .await;
    }

    /// Drop a connection and release whatever slot it held
    pub async fn disconnect(&self, conn: ConnId) {
        let _ = self.tx.send(RoomCommand::Disconnect { conn }).await;
    }

    /// Current rooms, sorted by id
    pub async fn snapshot(&self) -> Result<Vec<RoomSummary>, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RoomCommand::Snapshot { reply: reply_tx })
            .await;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }
}
