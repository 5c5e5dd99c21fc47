//! Escalation review handlers.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use conclave_types::escalation::{EscalationFilter, EscalationRecord};

use crate::http::error::AppError;
use crate::http::extractors::query::EscalationListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AcknowledgeBody {
    pub by: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub by: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// GET /api/v1/escalations - `?filter=open|pending|acknowledged|resolved|all`
/// and optional `?room=`.
pub async fn list_escalations(
    State(state): State<AppState>,
    Query(query): Query<EscalationListQuery>,
) -> Result<ApiResponse<Vec<EscalationRecord>>, AppError> {
    let start = Instant::now();
    let filter: EscalationFilter = query.filter.parse().map_err(AppError::Validation)?;
    let records = state
        .conclave
        .escalations()
        .list(filter, query.room.as_deref())
        .await?;
    Ok(ApiResponse::timed(records, start).with_link("self", "/api/v1/escalations"))
}

/// GET /api/v1/escalations/{id}
pub async fn get_escalation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<EscalationRecord>, AppError> {
    let start = Instant::now();
    let record = state.conclave.escalations().get(&id).await?;
    Ok(ApiResponse::timed(record, start))
}

/// POST /api/v1/escalations/{id}/ack
pub async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AcknowledgeBody>,
) -> Result<ApiResponse<EscalationRecord>, AppError> {
    let start = Instant::now();
    let record = state.conclave.escalations().acknowledge(&id, &body.by).await?;
    Ok(ApiResponse::timed(record, start))
}

/// POST /api/v1/escalations/{id}/resolve
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Result<ApiResponse<EscalationRecord>, AppError> {
    let start = Instant::now();
    let record = state
        .conclave
        .escalations()
        .resolve(&id, &body.by, body.note.as_deref())
        .await?;
    Ok(ApiResponse::timed(record, start))
}
