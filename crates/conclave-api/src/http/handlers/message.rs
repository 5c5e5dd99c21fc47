//! Room history and message posting handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conclave_types::dispatch::DispatchReport;
use conclave_types::event::{InboundEvent, InterfaceKind};
use conclave_types::message::{MessageKind, MessageQuery, RoomMessage};

use crate::http::error::AppError;
use crate::http::extractors::query::MessageListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for posting a human message.
#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Set by clients that may redeliver, e.g. after a reconnect.
    #[serde(default)]
    pub client_event_id: Option<String>,
    /// Hold the response until every addressed bot has finished.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageBody {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendResult {
    /// `false` for redelivered or blank messages.
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<RoomMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DispatchReport>,
}

/// GET /api/v1/rooms/{id}/messages - Page through or search (`?q=`) history.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> Result<ApiResponse<Vec<RoomMessage>>, AppError> {
    let start = Instant::now();
    let query: MessageQuery = query.into();
    let messages = state.conclave.rooms().messages(&id, &query).await?;
    Ok(ApiResponse::timed(messages, start))
}

/// GET /api/v1/rooms/{id}/messages/{message_id}
pub async fn get_message(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(String, Uuid)>,
) -> Result<ApiResponse<RoomMessage>, AppError> {
    let start = Instant::now();
    let message = state.conclave.rooms().get_message(&id, &message_id).await?;
    Ok(ApiResponse::timed(message, start))
}

/// POST /api/v1/rooms/{id}/messages - Post a human message into the room.
///
/// Dispatch runs in the background unless `wait` is set; bot replies
/// arrive on the room's WebSocket either way.
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<ApiResponse<SendResult>, AppError> {
    let start = Instant::now();
    if body.sender_id.trim().is_empty() {
        return Err(AppError::Validation("sender_id must not be empty".into()));
    }

    let event = InboundEvent {
        interface: InterfaceKind::Web,
        room_id: Some(id),
        sender_id: body.sender_id,
        content: body.content,
        kind: body.kind,
        reply_to: body.reply_to,
        metadata: body.metadata,
        client_event_id: body.client_event_id,
    };

    let result = if body.wait {
        match state.conclave.ingest_and_wait(event).await? {
            Some((message, report)) => SendResult {
                accepted: true,
                message: Some(message),
                report: Some(report),
            },
            None => SendResult {
                accepted: false,
                message: None,
                report: None,
            },
        }
    } else {
        let message = state.conclave.ingest(event).await?;
        SendResult {
            accepted: message.is_some(),
            message,
            report: None,
        }
    };

    let status = if result.accepted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(ApiResponse::timed(result, start).with_status(status))
}

/// PUT /api/v1/rooms/{id}/messages/{message_id}
pub async fn edit_message(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(String, Uuid)>,
    Json(body): Json<EditMessageBody>,
) -> Result<ApiResponse<RoomMessage>, AppError> {
    let start = Instant::now();
    let message = state
        .conclave
        .rooms()
        .edit_message(&id, &message_id, &body.content)
        .await?;
    Ok(ApiResponse::timed(message, start))
}
