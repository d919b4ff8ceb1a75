//! WebSocket connection task
//!
//! One task per client. It multiplexes three event sources: frames from the
//! socket, events queued by the room, and the keepalive timer. All room
//! interaction goes through the connection's [`Session`].

use crate::error::ClientRequestError;
use crate::handler::AppState;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::room::RoomId;
use crate::session::{Flow, Session};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

enum Event {
    Frame(Option<Result<Message, axum::Error>>),
    Outbound(Option<ServerEvent>),
    Tick,
}

/// Decode one inbound frame. `Ok(None)` means a control frame with nothing
/// to handle. Signaling is text-only.
pub fn parse_frame(msg: Message) -> Result<Option<ClientMessage>, ClientRequestError> {
    match msg {
        Message::Text(text) => Ok(Some(text.as_str().parse()?)),
        Message::Binary(_) => Err(ClientRequestError::UnsupportedType),
        Message::Ping(_) | Message::Pong(_) => Ok(None),
        Message::Close(_) => Err(ClientRequestError::Close),
    }
}

async fn send(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    socket.send(Message::Text(event.to_string().into())).await
}

/// Drive one client connection until it closes, leaves, goes silent or is
/// evicted. If `room_id` is given the connection joins it immediately.
pub async fn serve(mut socket: WebSocket, state: Arc<AppState>, room_id: Option<RoomId>) {
    let config = &state.config;
    let mut session = Session::new(Arc::clone(&state.registry), config.outbound_buffer);
    info!("Connection opened");

    if let Some(room_id) = room_id {
        let reply = match session.join(&room_id) {
            Ok(ack) => ack,
            Err(e) => {
                // Lost a race with another joiner after the upgrade.
                debug!("Join of {} refused after upgrade: {}", room_id, e);
                ServerEvent::from(&e)
            }
        };
        if send(&mut socket, &reply).await.is_err() {
            return;
        }
    }

    let mut ping = interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick completes immediately
    ping.tick().await;
    let mut last_seen = Instant::now();

    loop {
        let event = tokio::select! {
            frame = socket.recv() => Event::Frame(frame),
            out = session.next_outbound() => Event::Outbound(out),
            _ = ping.tick() => Event::Tick,
        };

        match event {
            Event::Frame(Some(Ok(msg))) => {
                last_seen = Instant::now();
                let flow = match parse_frame(msg) {
                    Ok(Some(msg)) => session.handle_message(msg),
                    Ok(None) => Flow::Continue(None),
                    Err(ClientRequestError::Close) => break,
                    Err(e) => {
                        warn!("Bad frame from client: {}", e);
                        Flow::Continue(Some(ServerEvent::from(&e)))
                    }
                };
                match flow {
                    Flow::Continue(Some(reply)) => {
                        if send(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Flow::Continue(None) => {}
                    Flow::Close => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            Event::Frame(Some(Err(e))) => {
                debug!("WebSocket error: {}", e);
                break;
            }
            Event::Frame(None) => break,
            Event::Outbound(Some(out)) => {
                if send(&mut socket, &out).await.is_err() {
                    break;
                }
            }
            Event::Outbound(None) => {
                info!("Participant dropped by its room, closing connection");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            Event::Tick => {
                if last_seen.elapsed() >= config.idle_timeout {
                    info!("Connection idle for {:?}, closing", config.idle_timeout);
                    break;
                }
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect();
    info!("Connection closed");
}
