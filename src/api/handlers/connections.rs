use crate::api::models::{ConnectionResponse, CreateConnectionRequest};
use crate::core::error::{CuratorError, Result};
use crate::db::models::{ProviderConnection, ProviderType};
use crate::db::repository::Repository;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use super::AppState;

/// Handler for GET /api/v1/connections
pub async fn list_connections(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let connections: Vec<ConnectionResponse> = state
        .connection_repo
        .find_all()
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(connections))
}

/// Handler for POST /api/v1/connections
pub async fn create_connection(
    State(state): State<AppState>,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<impl IntoResponse> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(CuratorError::ValidationError(
            "Connection name cannot be empty".to_string(),
        ));
    }

    let provider_type: ProviderType = req.provider_type.parse()?;

    let url = req.url.trim().trim_end_matches('/');
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
        _ => {
            return Err(CuratorError::ValidationError(format!(
                "Invalid server URL '{}'. Must start with http:// or https://",
                req.url
            )))
        }
    }

    if req.credential.trim().is_empty() {
        return Err(CuratorError::ValidationError(
            "Credential cannot be empty".to_string(),
        ));
    }

    let mut connection = ProviderConnection {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        provider_type,
        url: url.to_string(),
        credential: state.cipher.encrypt(req.credential.trim())?,
        active: false,
        created_at: Utc::now(),
    };
    state.connection_repo.create(&connection).await?;

    if req.activate {
        state.connection_repo.activate(&connection.id).await?;
        connection.active = true;
    }

    info!(
        connection_id = %connection.id,
        provider_type = %connection.provider_type,
        active = connection.active,
        "Provider connection registered"
    );

    Ok((StatusCode::CREATED, Json(ConnectionResponse::from(connection))))
}

/// Handler for POST /api/v1/connections/:id/activate
pub async fn activate_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.connection_repo.activate(&id).await?;
    let connection = find_connection(&state, &id).await?;

    info!(connection_id = %id, "Provider connection activated");
    Ok(Json(ConnectionResponse::from(connection)))
}

/// Handler for POST /api/v1/connections/:id/test
///
/// Transport failures are reported in the body, not as an HTTP error.
pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let connection = find_connection(&state, &id).await?;
    let provider = state.registry.get(connection.provider_type)?;
    let credential = state.cipher.decrypt(&connection.credential)?;

    let result = provider.test_connection(&connection.url, &credential).await;
    info!(connection_id = %id, ok = result.ok, "Provider connection tested");
    Ok(Json(result))
}

async fn find_connection(state: &AppState, id: &str) -> Result<ProviderConnection> {
    state
        .connection_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| CuratorError::NotFound(format!("Provider connection {} not found", id)))
}
