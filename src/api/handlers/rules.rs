use crate::api::models::{
    ClassifyRequest, ClassifyResponse, MessageResponse, PreviewRequest, RulesQuery,
    DEFAULT_PAGE_LIMIT,
};
use crate::core::error::{CuratorError, Result};
use crate::core::rule_engine::NewRule;
use crate::db::repository::Repository;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use super::AppState;

/// Handler for GET /api/v1/rules?libraryId=
pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<RulesQuery>,
) -> Result<impl IntoResponse> {
    Ok(Json(
        state.rule_engine.list_rules(query.library_id.as_deref()).await?,
    ))
}

/// Handler for POST /api/v1/rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<NewRule>,
) -> Result<impl IntoResponse> {
    let rule = state.rule_engine.create_rule(req).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// Handler for GET /api/v1/rules/:id
pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.rule_engine.get_rule(&id).await?))
}

/// Handler for DELETE /api/v1/rules/:id
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.rule_engine.delete_rule(&id).await?;
    Ok(Json(MessageResponse::new(format!("Rule {} deleted", id))))
}

/// Handler for POST /api/v1/rules/preview
pub async fn preview_rule(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> Result<impl IntoResponse> {
    if state.library_repo.find_by_id(&req.library_id).await?.is_none() {
        return Err(CuratorError::NotFound(format!(
            "Library {} not found",
            req.library_id
        )));
    }

    let preview = state
        .rule_engine
        .preview_rule(
            &req.library_id,
            &req.criteria,
            req.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;
    Ok(Json(preview))
}

/// Handler for POST /api/v1/classify
pub async fn classify_request(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> Result<impl IntoResponse> {
    let classification = state.rule_engine.classify(&req.metadata).await?;
    Ok(Json(ClassifyResponse::from(classification)))
}
