//! End-to-end tests over real WebSocket connections

use duet_server::{
    AppState, Envelope, Notice, Role, RoomId, ServerConfig, ServerEvent, SignalKind,
    create_router,
};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tower::ServiceExt;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn spawn_server(config: ServerConfig) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::new(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn join(addr: SocketAddr, room: &RoomId) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/join?roomID={room}"))
        .await
        .unwrap();
    ws
}

async fn next_event(ws: &mut Client) -> ServerEvent {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return text.as_str().parse().unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn send_json(ws: &mut Client, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

fn joined_role(event: &ServerEvent) -> Role {
    match event {
        ServerEvent::Notice(Notice::Joined { role, .. }) => *role,
        other => panic!("expected joined, got {other:?}"),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Read until the server closes the stream.
async fn expect_closed(ws: &mut Client) {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("connection was not closed");
}

fn upgrade_status(result: Result<(Client, impl Sized), WsError>) -> u16 {
    match result {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("upgrade unexpectedly succeeded"),
    }
}

#[tokio::test]
async fn two_party_call_from_create_to_teardown() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;
    let room = state.registry.create_room().unwrap();

    let mut a = join(addr, &room).await;
    assert_eq!(joined_role(&next_event(&mut a).await), Role::Initiator);

    let mut b = join(addr, &room).await;
    let b_joined = next_event(&mut b).await;
    assert_eq!(joined_role(&b_joined), Role::Responder);
    let b_id = match &b_joined {
        ServerEvent::Notice(Notice::Joined {
            participant_id,
            peers,
            ..
        }) => {
            assert_eq!(peers.len(), 1);
            assert_eq!(peers[0].role, Role::Initiator);
            *participant_id
        }
        _ => unreachable!(),
    };
    assert_eq!(
        next_event(&mut a).await,
        ServerEvent::Notice(Notice::PeerJoined {
            participant_id: b_id,
            role: Role::Responder
        })
    );

    // third joiner is turned away before the upgrade
    let result = connect_async(format!("ws://{addr}/join?roomID={room}")).await;
    assert_eq!(upgrade_status(result), 409);

    let sdp = json!({"type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"});
    send_json(&mut a, json!({"type": "offer", "payload": sdp})).await;
    assert_eq!(
        next_event(&mut b).await,
        ServerEvent::Signal(Envelope::new(SignalKind::Offer, sdp))
    );

    send_json(&mut b, json!({"type": "answer", "payload": "ans"})).await;
    assert_eq!(
        next_event(&mut a).await,
        ServerEvent::Signal(Envelope::new(SignalKind::Answer, json!("ans")))
    );

    b.close(None).await.unwrap();
    assert_eq!(
        next_event(&mut a).await,
        ServerEvent::Notice(Notice::PeerLeft {
            participant_id: b_id
        })
    );
    assert_eq!(state.registry.get_room(&room).unwrap().participant_count(), 1);

    a.close(None).await.unwrap();
    wait_until(|| state.registry.room_count() == 0).await;

    let result = connect_async(format!("ws://{addr}/join?roomID={room}")).await;
    assert_eq!(upgrade_status(result), 404);
}

#[tokio::test]
async fn candidates_arrive_in_send_order() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;
    let room = state.registry.create_room().unwrap();
    let mut a = join(addr, &room).await;
    next_event(&mut a).await;
    let mut b = join(addr, &room).await;
    next_event(&mut b).await;
    next_event(&mut a).await;

    for n in 0..20 {
        send_json(&mut a, json!({"type": "iceCandidate", "payload": {"n": n}})).await;
    }
    for n in 0..20 {
        assert_eq!(
            next_event(&mut b).await,
            ServerEvent::Signal(Envelope::new(SignalKind::Candidate, json!({"n": n})))
        );
    }
}

#[tokio::test]
async fn bare_connection_can_retry_joins() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;
    let room = state.registry.create_room().unwrap();
    let (mut ws, _) = connect_async(format!("ws://{addr}/join")).await.unwrap();

    send_json(&mut ws, json!({"type": "offer", "payload": null})).await;
    assert!(matches!(
        next_event(&mut ws).await,
        ServerEvent::Notice(Notice::Error { code, .. }) if code == "NOT_A_MEMBER"
    ));

    send_json(&mut ws, json!({"type": "join", "roomID": "missing"})).await;
    assert!(matches!(
        next_event(&mut ws).await,
        ServerEvent::Notice(Notice::Error { code, .. }) if code == "ROOM_NOT_FOUND"
    ));

    send_json(&mut ws, json!({"type": "join", "roomID": room.as_str()})).await;
    assert_eq!(joined_role(&next_event(&mut ws).await), Role::Initiator);
    assert_eq!(state.registry.participant_count(), 1);
}

#[tokio::test]
async fn lone_participant_is_told_nobody_is_there() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;
    let room = state.registry.create_room().unwrap();
    let mut a = join(addr, &room).await;
    next_event(&mut a).await;

    send_json(&mut a, json!({"type": "offer", "payload": "x"})).await;
    assert!(matches!(
        next_event(&mut a).await,
        ServerEvent::Notice(Notice::Error { code, .. }) if code == "PEER_NOT_CONNECTED"
    ));
}

#[tokio::test]
async fn malformed_frames_do_not_drop_the_connection() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;
    let room = state.registry.create_room().unwrap();
    let mut a = join(addr, &room).await;
    next_event(&mut a).await;

    a.send(Message::Text("{not json".into())).await.unwrap();
    assert!(matches!(
        next_event(&mut a).await,
        ServerEvent::Notice(Notice::Error { code, .. }) if code == "INVALID_MESSAGE"
    ));

    let mut b = join(addr, &room).await;
    assert_eq!(joined_role(&next_event(&mut b).await), Role::Responder);
}

#[tokio::test]
async fn leave_is_forwarded_and_closes_the_sender() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;
    let room = state.registry.create_room().unwrap();
    let mut a = join(addr, &room).await;
    next_event(&mut a).await;
    let mut b = join(addr, &room).await;
    next_event(&mut b).await;
    next_event(&mut a).await;

    send_json(&mut a, json!({"type": "leave"})).await;
    assert_eq!(
        next_event(&mut b).await,
        ServerEvent::Signal(Envelope::new(SignalKind::Leave, serde_json::Value::Null))
    );
    assert!(matches!(
        next_event(&mut b).await,
        ServerEvent::Notice(Notice::PeerLeft { .. })
    ));
    expect_closed(&mut a).await;
    assert_eq!(state.registry.participant_count(), 1);

    // the seat is free again, and the newcomer takes the initiator role
    let mut c = join(addr, &room).await;
    assert_eq!(joined_role(&next_event(&mut c).await), Role::Initiator);
}

#[tokio::test]
async fn silent_clients_are_disconnected() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(300),
        ..ServerConfig::default()
    };
    let (addr, state) = spawn_server(config).await;
    let room = state.registry.create_room().unwrap();

    // never read, so pings go unanswered
    let _a = join(addr, &room).await;
    wait_until(|| state.registry.participant_count() == 1).await;
    wait_until(|| state.registry.room_count() == 0).await;
}

#[tokio::test]
async fn responsive_clients_outlive_many_ping_periods() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(300),
        ..ServerConfig::default()
    };
    let (addr, state) = spawn_server(config).await;
    let room = state.registry.create_room().unwrap();
    let mut a = join(addr, &room).await;
    next_event(&mut a).await;

    // keep reading, which answers every ping
    let mut pings = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while let Ok(frame) = tokio::time::timeout_at(deadline, a.next()).await {
        match frame {
            Some(Ok(Message::Ping(_))) => pings += 1,
            other => panic!("unexpected frame {other:?}"),
        }
    }

    assert!(pings >= 3, "only {pings} pings in a second");
    assert_eq!(state.registry.participant_count(), 1);
}

#[tokio::test]
async fn oversized_messages_close_the_connection() {
    let config = ServerConfig {
        max_message_size: 1024,
        ..ServerConfig::default()
    };
    let (addr, state) = spawn_server(config).await;
    let room = state.registry.create_room().unwrap();
    let mut a = join(addr, &room).await;
    next_event(&mut a).await;

    let sdp = "a".repeat(4096);
    // the server may hang up before the write completes
    let _ = a
        .send(Message::Text(json!({"type": "offer", "payload": sdp}).to_string().into()))
        .await;
    expect_closed(&mut a).await;
    wait_until(|| state.registry.room_count() == 0).await;
}

#[tokio::test]
async fn create_endpoint_hands_out_joinable_rooms() {
    let (addr, state) = spawn_server(ServerConfig::default()).await;

    let response = create_router(Arc::clone(&state))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/create")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let room = RoomId::from(created["roomID"].as_str().unwrap());
    assert!(state.registry.get_room(&room).is_ok());

    let mut a = join(addr, &room).await;
    assert_eq!(joined_role(&next_event(&mut a).await), Role::Initiator);
}
