//! End-to-end tests for the signaling relay
//!
//! Each test binds a real server on a loopback port and drives it with
//! tokio-tungstenite clients, the way the broadcaster and viewer pages do.
//!
//! Run: `cargo test --test e2e`

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use screencast_relay::config::Keepalive;
use screencast_relay::signaling::{
    ClientId, RoomId, RoomManagerHandle, RoomSummary, SignalingServer,
};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

async fn start() -> (String, RoomManagerHandle) {
    start_with(Keepalive::default()).await
}

async fn start_with(keepalive: Keepalive) -> (String, RoomManagerHandle) {
    let server = SignalingServer::bind("127.0.0.1:0")
        .await
        .unwrap()
        .with_keepalive(keepalive);
    let url = format!("ws://{}", server.local_addr().unwrap());
    let rooms = server.rooms();
    tokio::spawn(server.run());
    (url, rooms)
}

async fn connect(url: &str) -> Ws {
    connect_async(url).await.unwrap().0
}

async fn send(ws: &mut Ws, text: &str) {
    ws.send(Message::text(text.to_owned())).await.unwrap();
}

async fn join(ws: &mut Ws, room: &str, role: &str, id: &str) -> Value {
    let msg = json!({"type": "join", "roomId": room, "role": role, "clientId": id});
    send(ws, &msg.to_string()).await;
    recv_json(ws).await
}

/// Next text frame, skipping keepalive traffic.
async fn recv(ws: &mut Ws) -> String {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .unwrap();
        match msg {
            Message::Text(text) => return text.as_str().to_owned(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

async fn recv_json(ws: &mut Ws) -> Value {
    serde_json::from_str(&recv(ws).await).unwrap()
}

async fn assert_quiet(ws: &mut Ws) {
    let deadline = tokio::time::Instant::now() + QUIET_PERIOD;
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected no traffic, got {:?}", other),
        }
    }
}

async fn wait_for_rooms(rooms: &RoomManagerHandle, check: impl Fn(&[RoomSummary]) -> bool) {
    for _ in 0..100 {
        let snapshot = rooms.snapshot().await.unwrap();
        if check(&snapshot) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room table never reached the expected state");
}

#[tokio::test]
async fn viewer_before_broadcaster_only_gets_joined() {
    let (url, rooms) = start().await;
    let mut v1 = connect(&url).await;

    let reply = join(&mut v1, "r1", "viewer", "v1").await;
    assert_eq!(reply, json!({"type": "joined", "role": "viewer"}));
    assert_quiet(&mut v1).await;

    let snapshot = rooms.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].room_id, RoomId::from("r1"));
    assert_eq!(snapshot[0].broadcaster, None);
}

#[tokio::test]
async fn handshake_is_relayed_between_broadcaster_and_viewer() {
    let (url, _rooms) = start().await;
    let mut b1 = connect(&url).await;
    let mut v1 = connect(&url).await;
    let mut v2 = connect(&url).await;

    assert_eq!(
        join(&mut b1, "r1", "broadcaster", "b1").await,
        json!({"type": "joined", "role": "broadcaster"})
    );
    join(&mut v1, "r1", "viewer", "v1").await;
    assert_eq!(
        recv_json(&mut b1).await,
        json!({"type": "viewer-connected", "viewerId": "v1"})
    );
    join(&mut v2, "r1", "viewer", "v2").await;
    assert_eq!(
        recv_json(&mut b1).await,
        json!({"type": "viewer-connected", "viewerId": "v2"})
    );

    // odd spacing and key order must survive untouched
    let offer = r#"{"type":"offer", "roomId":"r1","to":"viewer","viewerId":"v1","offer":{"sdp":"X","type":"offer"}}"#;
    send(&mut b1, offer).await;
    assert_eq!(recv(&mut v1).await, offer);

    let answer = r#"{"type":"answer","roomId":"r1","to":"broadcaster","viewerId":"v1","answer":{"sdp":"Y"}}"#;
    send(&mut v1, answer).await;
    assert_eq!(recv(&mut b1).await, answer);

    let to_viewer = r#"{"type":"ice-candidate","roomId":"r1","to":"viewer","viewerId":"v1","candidate":{"candidate":"c1"}}"#;
    send(&mut b1, to_viewer).await;
    assert_eq!(recv(&mut v1).await, to_viewer);

    let to_broadcaster = r#"{"type":"ice-candidate","roomId":"r1","to":"broadcaster","viewerId":"v1","candidate":null}"#;
    send(&mut v1, to_broadcaster).await;
    assert_eq!(recv(&mut b1).await, to_broadcaster);

    assert_quiet(&mut v2).await;
}

#[tokio::test]
async fn undeliverable_and_malformed_messages_are_dropped() {
    let (url, _rooms) = start().await;
    let mut v1 = connect(&url).await;
    join(&mut v1, "r1", "viewer", "v1").await;

    send(
        &mut v1,
        r#"{"type":"answer","roomId":"r1","to":"broadcaster","viewerId":"v1","answer":{}}"#,
    )
    .await;
    send(
        &mut v1,
        r#"{"type":"answer","roomId":"missing","to":"broadcaster","answer":{}}"#,
    )
    .await;
    send(&mut v1, "this is not json").await;
    send(&mut v1, r#"{"type":"join","roomId":"r1"}"#).await;
    send(&mut v1, r#"{"type":"chat","text":"hi"}"#).await;
    assert_quiet(&mut v1).await;

    // the connection is still usable
    let reply = join(&mut v1, "r2", "viewer", "v1").await;
    assert_eq!(reply, json!({"type": "joined", "role": "viewer"}));
}

#[tokio::test]
async fn broadcaster_leaving_notifies_viewers_and_room_is_removed() {
    let (url, rooms) = start().await;
    let mut b1 = connect(&url).await;
    let mut v1 = connect(&url).await;
    let mut v2 = connect(&url).await;

    join(&mut b1, "r1", "broadcaster", "b1").await;
    join(&mut v1, "r1", "viewer", "v1").await;
    join(&mut v2, "r1", "viewer", "v2").await;

    b1.close(None).await.unwrap();

    let gone = json!({"type": "broadcaster-disconnected"});
    assert_eq!(recv_json(&mut v1).await, gone);
    assert_eq!(recv_json(&mut v2).await, gone);

    let snapshot = rooms.snapshot().await.unwrap();
    assert_eq!(snapshot[0].broadcaster, None);
    assert_eq!(
        snapshot[0].viewers,
        vec![ClientId::from("v1"), ClientId::from("v2")]
    );

    drop(v1);
    v2.close(None).await.unwrap();
    wait_for_rooms(&rooms, |rooms| rooms.is_empty()).await;
}

#[tokio::test]
async fn viewer_leaving_is_reported_with_its_id() {
    let (url, rooms) = start().await;
    let mut b1 = connect(&url).await;
    let mut v1 = connect(&url).await;

    join(&mut b1, "r1", "broadcaster", "b1").await;
    join(&mut v1, "r1", "viewer", "v1").await;
    recv_json(&mut b1).await;

    v1.close(None).await.unwrap();

    assert_eq!(
        recv_json(&mut b1).await,
        json!({"type": "viewer-disconnected", "viewerId": "v1"})
    );
    wait_for_rooms(&rooms, |rooms| rooms.len() == 1 && rooms[0].viewers.is_empty()).await;
}

#[tokio::test]
async fn binary_frames_carrying_json_are_accepted() {
    let (url, _rooms) = start().await;
    let mut v1 = connect(&url).await;

    let join = json!({"type": "join", "roomId": "r1", "role": "viewer", "clientId": "v1"});
    v1.send(Message::Binary(Bytes::from(join.to_string())))
        .await
        .unwrap();

    assert_eq!(
        recv_json(&mut v1).await,
        json!({"type": "joined", "role": "viewer"})
    );
}

#[tokio::test]
async fn unresponsive_viewer_is_dropped_after_pong_timeout() {
    let (url, rooms) = start_with(Keepalive {
        ping_interval: Duration::from_secs(1),
        pong_timeout: Duration::from_millis(500),
    })
    .await;
    let mut b1 = connect(&url).await;
    let mut v1 = connect(&url).await;

    join(&mut b1, "r1", "broadcaster", "b1").await;
    join(&mut v1, "r1", "viewer", "v1").await;
    assert_eq!(
        recv_json(&mut b1).await,
        json!({"type": "viewer-connected", "viewerId": "v1"})
    );

    // v1 stays open but is never read again, so its pongs stop; b1 keeps
    // reading and answers every ping
    assert_eq!(
        recv_json(&mut b1).await,
        json!({"type": "viewer-disconnected", "viewerId": "v1"})
    );
    wait_for_rooms(&rooms, |rooms| {
        rooms.len() == 1
            && rooms[0].broadcaster == Some(ClientId::from("b1"))
            && rooms[0].viewers.is_empty()
    })
    .await;

    assert_quiet(&mut b1).await;
    drop(v1);
}
