use crate::api::models::{GenerateRuleRequest, SendMessageRequest, StartSessionRequest};
use crate::core::error::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use super::AppState;

/// Handler for POST /api/v1/rule-builder/sessions
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<impl IntoResponse> {
    let session = state
        .rule_builder
        .start_session(&req.library_id, &req.media_type)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Handler for GET /api/v1/rule-builder/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.rule_builder.get_session(&id).await?))
}

/// Handler for POST /api/v1/rule-builder/sessions/:id/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state.rule_builder.process_message(&id, &req.message).await?,
    ))
}

/// Handler for POST /api/v1/rule-builder/sessions/:id/generate
pub async fn generate_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<GenerateRuleRequest>,
) -> Result<impl IntoResponse> {
    let rule = state.rule_builder.generate_rule(&id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}
