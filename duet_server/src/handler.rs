//! HTTP routes for the signaling server

use crate::config::ServerConfig;
use crate::connection;
use crate::error::SignalingError;
use crate::registry::RoomRegistry;
use crate::room::{RoomId, RoomSnapshot};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state.
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(RoomRegistry::from_config(&config)),
            config: Arc::new(config),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    #[serde(rename = "roomID")]
    pub room_id: RoomId,
}

#[derive(Debug, Deserialize)]
struct JoinParams {
    #[serde(rename = "roomID")]
    room_id: Option<RoomId>,
}

/// Build the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/create", post(create_handler))
        .route("/join", get(join_handler))
        .route("/room/{room_id}", get(room_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn index_handler() -> &'static str {
    "Duet Signaling Server\n\
     \n\
     Endpoints:\n\
     - POST /create - Create a room, returns {\"roomID\": \"...\"}\n\
     - GET /join?roomID={id} - Upgrade to a WebSocket and join the room\n\
     - GET /join - Upgrade without a room; send {\"type\":\"join\",\"roomID\":\"...\"}\n\
     - GET /room/{id} - Room details\n\
     - GET /health - Health check\n\
     \n\
     Frames: {\"type\": \"offer\" | \"answer\" | \"candidate\" | \"leave\", \"payload\": ...}\n"
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": state.registry.room_count(),
        "participants": state.registry.participant_count(),
    }))
}

async fn create_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CreateRoomResponse>, SignalingError> {
    let room_id = state.registry.create_room()?;
    Ok(Json(CreateRoomResponse { room_id }))
}

async fn room_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, SignalingError> {
    let room = state.registry.get_room(&RoomId::from(room_id))?;
    Ok(Json(room.snapshot()))
}

/// Validate the room before upgrading so missing and full rooms get a plain
/// HTTP error instead of a socket.
async fn join_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JoinParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Some(room_id) = &params.room_id {
        if let Err(e) = state.registry.check_joinable(room_id) {
            return e.into_response();
        }
    }

    match ws {
        Ok(ws) => ws
            .max_message_size(state.config.max_message_size)
            .max_frame_size(state.config.max_message_size)
            .on_upgrade(move |socket| connection::serve(socket, state, params.room_id)),
        Err(rejection) => rejection.into_response(),
    }
}
