//! Role card and proposal handlers.
//!
//! Bots never edit their own cards. Changes arrive as proposals that a
//! human approves (writing the workspace or global layer) or rejects.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use conclave_core::role_card::RoleCardLayers;
use conclave_types::role_card::{
    ProposalStatus, RoleCard, RoleCardLayer, RoleCardProposal, RoleCardScope,
};

use crate::http::error::AppError;
use crate::http::extractors::query::ProposalListQuery;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProposeBody {
    pub changes: RoleCardLayer,
    pub reason: String,
    pub proposed_by: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    #[serde(default = "default_scope")]
    pub scope: String,
    pub approver: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub decider: String,
}

fn default_scope() -> String {
    "workspace".to_string()
}

fn parse_scope(raw: &str) -> Result<RoleCardScope, AppError> {
    raw.parse().map_err(AppError::Validation)
}

/// GET /api/v1/bots/{id}/card - The merged, effective card.
pub async fn get_card(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<ApiResponse<RoleCard>, AppError> {
    let start = Instant::now();
    let card = state.conclave.cards().load(&bot_id).await?;
    let layers = format!("/api/v1/bots/{bot_id}/card/layers");
    Ok(ApiResponse::timed(card, start).with_link("layers", &layers))
}

/// GET /api/v1/bots/{id}/card/layers
pub async fn get_layers(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<ApiResponse<RoleCardLayers>, AppError> {
    let start = Instant::now();
    let layers = state.conclave.cards().layers(&bot_id).await?;
    Ok(ApiResponse::timed(layers, start))
}

/// PUT /api/v1/bots/{id}/card/{scope} - Replace one override layer and
/// return the resulting card.
pub async fn save_layer(
    State(state): State<AppState>,
    Path((bot_id, scope)): Path<(String, String)>,
    Json(layer): Json<RoleCardLayer>,
) -> Result<ApiResponse<RoleCard>, AppError> {
    let start = Instant::now();
    let scope = parse_scope(&scope)?;
    let cards = state.conclave.cards();
    cards.save_layer(&bot_id, &layer, scope).await?;
    let card = cards.load(&bot_id).await?;
    Ok(ApiResponse::timed(card, start))
}

/// POST /api/v1/bots/{id}/card/proposals
pub async fn propose(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(body): Json<ProposeBody>,
) -> Result<ApiResponse<RoleCardProposal>, AppError> {
    let start = Instant::now();
    let proposal = state
        .conclave
        .cards()
        .propose_update(&bot_id, body.changes, &body.reason, &body.proposed_by)
        .await?;
    let href = format!("/api/v1/proposals/{}", proposal.id);
    Ok(ApiResponse::timed(proposal, start)
        .with_status(StatusCode::CREATED)
        .with_link("self", &href))
}

/// GET /api/v1/proposals - Filter by `?bot=` and `?status=`.
pub async fn list_proposals(
    State(state): State<AppState>,
    Query(query): Query<ProposalListQuery>,
) -> Result<ApiResponse<Vec<RoleCardProposal>>, AppError> {
    let start = Instant::now();
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<ProposalStatus>().map_err(AppError::Validation))
        .transpose()?;
    let proposals = state
        .conclave
        .cards()
        .list_proposals(query.bot.as_deref(), status)
        .await?;
    Ok(ApiResponse::timed(proposals, start))
}

/// GET /api/v1/proposals/{id}
pub async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<RoleCardProposal>, AppError> {
    let start = Instant::now();
    let proposal = state.conclave.cards().get_proposal(&id).await?;
    Ok(ApiResponse::timed(proposal, start))
}

/// POST /api/v1/proposals/{id}/approve
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Result<ApiResponse<RoleCardProposal>, AppError> {
    let start = Instant::now();
    let scope = parse_scope(&body.scope)?;
    let proposal = state
        .conclave
        .cards()
        .approve_proposal(&id, scope, &body.approver)
        .await?;
    Ok(ApiResponse::timed(proposal, start))
}

/// POST /api/v1/proposals/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Result<ApiResponse<RoleCardProposal>, AppError> {
    let start = Instant::now();
    let proposal = state.conclave.cards().reject_proposal(&id, &body.decider).await?;
    Ok(ApiResponse::timed(proposal, start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approve_defaults_to_workspace() {
        let body: ApproveBody = serde_json::from_str(r#"{"approver": "dana"}"#).unwrap();
        assert_eq!(parse_scope(&body.scope).unwrap(), RoleCardScope::Workspace);
    }

    #[test]
    fn test_unknown_scope_is_validation_error() {
        let err = parse_scope("galaxy").unwrap_err();
        assert_eq!(err.code().as_str(), "VALIDATION_ERROR");
    }
}
