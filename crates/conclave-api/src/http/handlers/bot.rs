//! Bot roster, presence and cancellation handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use conclave_types::bot::{BotStatus, BotSummary};
use conclave_types::error::RoomError;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetStatusBody {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct BotDetail {
    #[serde(flatten)]
    pub summary: BotSummary,
    /// Active rooms the bot participates in.
    pub rooms: Vec<String>,
}

/// GET /api/v1/bots - Every known bot with its current status.
pub async fn list_bots(State(state): State<AppState>) -> Result<ApiResponse<Vec<BotSummary>>, AppError> {
    let start = Instant::now();
    let bots = state.conclave.dispatcher().roster().await?;
    Ok(ApiResponse::timed(bots, start).with_link("self", "/api/v1/bots"))
}

/// GET /api/v1/bots/{id}
pub async fn get_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<ApiResponse<BotDetail>, AppError> {
    let start = Instant::now();
    let conclave = &state.conclave;

    let summary = conclave
        .dispatcher()
        .roster()
        .await?
        .into_iter()
        .find(|b| b.profile.id == bot_id)
        .ok_or_else(|| RoomError::BotNotFound(bot_id.clone()))?;
    let rooms = conclave
        .rooms()
        .list(false)
        .await?
        .into_iter()
        .filter(|r| r.has_participant(&bot_id))
        .map(|r| r.id)
        .collect();

    let detail = BotDetail {
        summary,
        rooms,
    };
    let card = format!("/api/v1/bots/{bot_id}/card");
    Ok(ApiResponse::timed(detail, start).with_link("card", &card))
}

/// PUT /api/v1/bots/{id}/status - Mark a bot online, away or offline.
///
/// `thinking` is owned by the dispatcher and cannot be set by hand.
pub async fn set_status(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(body): Json<SetStatusBody>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let status: BotStatus = body.status.parse().map_err(AppError::Validation)?;
    if status == BotStatus::Thinking {
        return Err(AppError::Validation(
            "status 'thinking' is set by the dispatcher".into(),
        ));
    }

    let status = state.conclave.dispatcher().set_status(&bot_id, status).await?;
    Ok(ApiResponse::timed(
        serde_json::json!({ "bot_id": bot_id, "status": status }),
        start,
    ))
}

/// POST /api/v1/rooms/{id}/cancel - Cancel the room's in-flight dispatches.
pub async fn cancel_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    state.conclave.rooms().get(&room_id).await?;
    let cancelled = state.conclave.dispatcher().cancel(&room_id);
    Ok(ApiResponse::timed(
        serde_json::json!({ "room_id": room_id, "cancelled": cancelled }),
        start,
    ))
}
