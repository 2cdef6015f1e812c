//! HTTP route definitions for the health and admin surface

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::app::AppState;
use crate::codec::GameCode;
use crate::game::room::RoomCommand;
use crate::protocol::disconnect::DisconnectReason;
use crate::protocol::settings::GameSettings;
use crate::util::time::uptime_secs;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler))
        .route("/rooms", post(create_room_handler))
        .route("/rooms/:code", delete(destroy_room_handler))
        .route("/rooms/:code/saah", post(set_saah_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    active_players: usize,
    connected_peers: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let rooms = state.worker.rooms();
    let active_players = rooms
        .iter()
        .map(|entry| entry.value().player_count.load(std::sync::atomic::Ordering::Relaxed))
        .sum();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: rooms.len(),
        active_players,
        connected_peers: state.worker.peer_count(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Serialize)]
struct RoomSummary {
    code: String,
    players: usize,
    age_secs: u64,
}

#[derive(Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomSummary>,
}

async fn rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    let rooms = state
        .worker
        .rooms()
        .iter()
        .map(|entry| {
            let handle = entry.value();
            RoomSummary {
                code: handle.code.to_string(),
                players: handle.player_count.load(std::sync::atomic::Ordering::Relaxed),
                age_secs: handle.created_at.elapsed().as_secs(),
            }
        })
        .collect();
    Json(RoomsResponse { rooms })
}

#[derive(Deserialize)]
struct CreateRoomRequest {
    settings: Option<GameSettings>,
}

#[derive(Serialize)]
struct CreateRoomResponse {
    code: String,
}

async fn create_room_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Json<CreateRoomResponse> {
    let code = state
        .worker
        .create_room(req.settings.unwrap_or_default())
        .await;
    Json(CreateRoomResponse { code: code.to_string() })
}

async fn destroy_room_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, AppError> {
    let code = GameCode::parse(&code)
        .map_err(|_| AppError::BadRequest(format!("invalid room code: {}", code)))?;

    let handle = state
        .worker
        .rooms()
        .get(&code)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("no room {}", code)))?;

    handle
        .cmd_tx
        .send(RoomCommand::Destroy { reason: DisconnectReason::ServerRequest })
        .await
        .map_err(|_| AppError::Internal("room task is gone".to_string()))?;

    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetSaahRequest {
    enabled: bool,
    #[serde(default)]
    keep_previous_host: bool,
}

async fn set_saah_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<SetSaahRequest>,
) -> Result<StatusCode, AppError> {
    let code = GameCode::parse(&code)
        .map_err(|_| AppError::BadRequest(format!("invalid room code: {}", code)))?;

    let handle = state
        .worker
        .rooms()
        .get(&code)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("no room {}", code)))?;

    handle
        .cmd_tx
        .send(RoomCommand::SetSaah {
            enabled: req.enabled,
            keep_previous_host: req.keep_previous_host,
        })
        .await
        .map_err(|_| AppError::Internal("room task is gone".to_string()))?;

    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
