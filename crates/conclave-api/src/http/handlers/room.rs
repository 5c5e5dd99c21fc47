//! Room lifecycle and participant handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use conclave_types::event::RoomSnapshot;
use conclave_types::room::{CreateRoomRequest, Room};

use crate::http::error::AppError;
use crate::http::extractors::query::RoomListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SummaryBody {
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantBody {
    pub bot_id: String,
}

/// GET /api/v1/rooms - List rooms, archived ones only with `?all=true`.
pub async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<RoomListQuery>,
) -> Result<ApiResponse<Vec<Room>>, AppError> {
    let start = Instant::now();
    let rooms = state.conclave.rooms().list(query.all).await?;
    Ok(ApiResponse::timed(rooms, start).with_link("self", "/api/v1/rooms"))
}

/// POST /api/v1/rooms - Create a room.
pub async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<ApiResponse<Room>, AppError> {
    let start = Instant::now();
    let room = state.conclave.rooms().create(body).await?;
    let href = format!("/api/v1/rooms/{}", room.id);
    Ok(ApiResponse::timed(room, start)
        .with_status(StatusCode::CREATED)
        .with_link("self", &href))
}

/// GET /api/v1/rooms/{id}
pub async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Room>, AppError> {
    let start = Instant::now();
    let room = state.conclave.rooms().get(&id).await?;
    let messages = format!("/api/v1/rooms/{id}/messages");
    Ok(ApiResponse::timed(room, start).with_link("messages", &messages))
}

/// GET /api/v1/rooms/{id}/snapshot - Room, recent history and open
/// escalations, as a new subscriber would see them.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<RoomSnapshot>, AppError> {
    let start = Instant::now();
    let snapshot = state.conclave.snapshot(&id).await?;
    Ok(ApiResponse::timed(snapshot, start))
}

/// DELETE /api/v1/rooms/{id} - Cancel in-flight work and delete the room.
pub async fn delete_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    state.conclave.delete_room(&id).await?;
    Ok(ApiResponse::timed(serde_json::json!({ "deleted": id }), start))
}

/// POST /api/v1/rooms/{id}/archive
pub async fn archive_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Room>, AppError> {
    let start = Instant::now();
    let room = state.conclave.rooms().archive(&id).await?;
    Ok(ApiResponse::timed(room, start))
}

/// PUT /api/v1/rooms/{id}/summary
pub async fn update_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SummaryBody>,
) -> Result<ApiResponse<Room>, AppError> {
    let start = Instant::now();
    let room = state.conclave.rooms().update_summary(&id, &body.summary).await?;
    Ok(ApiResponse::timed(room, start))
}

/// GET /api/v1/rooms/{id}/participants
pub async fn list_participants(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Vec<String>>, AppError> {
    let start = Instant::now();
    let participants = state.conclave.rooms().list_participants(&id).await?;
    Ok(ApiResponse::timed(participants, start))
}

/// POST /api/v1/rooms/{id}/participants
pub async fn add_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ParticipantBody>,
) -> Result<ApiResponse<Room>, AppError> {
    let start = Instant::now();
    let room = state.conclave.rooms().add_participant(&id, &body.bot_id).await?;
    Ok(ApiResponse::timed(room, start))
}

/// DELETE /api/v1/rooms/{id}/participants/{bot_id}
pub async fn remove_participant(
    State(state): State<AppState>,
    Path((id, bot_id)): Path<(String, String)>,
) -> Result<ApiResponse<Room>, AppError> {
    let start = Instant::now();
    let room = state.conclave.rooms().remove_participant(&id, &bot_id).await?;
    Ok(ApiResponse::timed(room, start))
}
