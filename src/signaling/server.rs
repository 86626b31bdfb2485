use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message, Utf8Bytes};
use tracing::{debug, error, info, warn};

use super::actor::RoomManagerHandle;
use super::messages::ClientMessage;
use super::types::{ConnId, OutboundMessage, SignalingError};
use crate::config::Keepalive;

pub struct SignalingServer {
    listener: TcpListener,
    handle: RoomManagerHandle,
    keepalive: Keepalive,
}

impl SignalingServer {
    /// Bind the listener and start the room manager actor
    pub async fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: RoomManagerHandle::spawn(),
            keepalive: Keepalive::default(),
        })
    }

    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle onto the shared room table
    pub fn rooms(&self) -> RoomManagerHandle {
        self.handle.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let handle = self.handle.clone();
            let keepalive = self.keepalive;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle, keepalive).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RoomManagerHandle,
    keepalive: Keepalive,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let conn = ConnId::generate();
    info!("WebSocket connection from {} as {}", addr, conn);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    handle.connect(conn, tx).await;

    let mut ping_interval = tokio::time::interval(keepalive.ping_interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", conn);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + keepalive.pong_timeout);
                debug!("Ping sent to {}", conn);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", conn);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", conn, e);
                        break;
                    }
                    None => break,
                };

                let text = match msg {
                    Message::Text(text) => Ok(text),
                    Message::Binary(bytes) => Utf8Bytes::try_from(bytes)
                        .map_err(|e| SignalingError::Decode(e.to_string())),
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", conn);
                        continue;
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", conn);
                        break;
                    }
                    _ => continue,
                };

                let result = match text {
                    Ok(text) => handle_text_message(text, conn, &handle).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("Message from {} ignored: {}", conn, e);
                }
            }
        }
    }

    handle.disconnect(conn).await;

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", conn, addr);

    Ok(())
}

async fn handle_text_message(
    text: Utf8Bytes,
    conn: ConnId,
    handle: &RoomManagerHandle,
) -> Result<(), SignalingError> {
    let client_msg: ClientMessage = serde_json::from_str(text.as_str())?;
    let kind = client_msg.kind();

    match client_msg {
        ClientMessage::Join {
            room_id,
            role,
            client_id,
        } => handle.join(conn, room_id, role, client_id).await,

        ClientMessage::Offer(envelope)
        | ClientMessage::Answer(envelope)
        | ClientMessage::IceCandidate(envelope) => {
            debug!("{} from {} for room {}", kind, conn, envelope.room_id);
            handle
                .relay(conn, kind, envelope, OutboundMessage::new(text))
                .await
        }

        ClientMessage::Unknown => debug!("Ignoring unknown message type from {}", conn),
    }

    Ok(())
}
