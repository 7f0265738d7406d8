use crate::api::models::{
    CreateLibraryRequest, MessageResponse, PageQuery, PagedResponse, SyncQuery, SyncRunsQuery,
};
use crate::core::error::{CuratorError, Result};
use crate::core::pattern_analyzer::AnalyzeOptions;
use crate::core::sync_engine::SyncOptions;
use crate::db::models::Library;
use crate::db::repository::Repository;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use super::{detached, AppState};

const DEFAULT_RUN_LIMIT: usize = 20;
const MAX_RUN_LIMIT: usize = 100;

/// Handler for GET /api/v1/libraries
pub async fn list_libraries(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.library_repo.find_all().await?))
}

/// Handler for POST /api/v1/libraries
pub async fn create_library(
    State(state): State<AppState>,
    Json(req): Json<CreateLibraryRequest>,
) -> Result<impl IntoResponse> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(CuratorError::ValidationError(
            "Library name cannot be empty".to_string(),
        ));
    }
    if req.external_id.trim().is_empty() {
        return Err(CuratorError::ValidationError(
            "Library externalId cannot be empty".to_string(),
        ));
    }
    if req.media_type.trim().is_empty() {
        return Err(CuratorError::ValidationError(
            "Library mediaType cannot be empty".to_string(),
        ));
    }
    if let Some(rule_set) = &req.rule_set {
        rule_set.validate()?;
    }

    if state
        .connection_repo
        .find_by_id(&req.provider_connection_id)
        .await?
        .is_none()
    {
        return Err(CuratorError::NotFound(format!(
            "Provider connection {} not found",
            req.provider_connection_id
        )));
    }

    let library = Library {
        id: Uuid::new_v4().to_string(),
        provider_connection_id: req.provider_connection_id,
        external_id: req.external_id.trim().to_string(),
        name: name.to_string(),
        media_type: req.media_type.trim().to_lowercase(),
        enabled: req.enabled.unwrap_or(true),
        rule_set: req.rule_set,
        last_synced_at: None,
        created_at: Utc::now(),
    };
    state.library_repo.create(&library).await?;

    info!(library_id = %library.id, name = %library.name, "Library registered");
    Ok((StatusCode::CREATED, Json(library)))
}

/// Handler for GET /api/v1/libraries/:id
pub async fn get_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(find_library(&state, &id).await?))
}

/// Handler for POST /api/v1/libraries/:id/sync?full=
///
/// Answers with the finished run. The sync itself runs detached, so a
/// request timeout leaves it to complete in the background.
pub async fn sync_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SyncQuery>,
) -> Result<impl IntoResponse> {
    let options = SyncOptions {
        incremental: !query.full,
        batch_size: state.config.sync.batch_size,
    };
    let engine = state.sync_engine.clone();
    let run = detached(async move { engine.sync_library(&id, options).await }).await?;
    Ok(Json(run))
}

/// Handler for GET /api/v1/libraries/:id/sync-runs
pub async fn list_sync_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SyncRunsQuery>,
) -> Result<impl IntoResponse> {
    find_library(&state, &id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
    Ok(Json(state.sync_engine.list_runs(&id, limit).await?))
}

/// Handler for GET /api/v1/sync-runs/:id
pub async fn get_sync_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.sync_engine.get_run(&id).await?))
}

/// Handler for GET /api/v1/libraries/:id/items?offset&limit
pub async fn list_library_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    find_library(&state, &id).await?;

    let (offset, limit) = (page.offset(), page.limit());
    let (total, items) = state.item_repo.list_by_library(&id, offset, limit).await?;
    Ok(Json(PagedResponse {
        total,
        offset,
        limit,
        items,
    }))
}

/// Handler for GET /api/v1/items/:server_id/:external_id
pub async fn get_item(
    State(state): State<AppState>,
    Path((server_id, external_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let item = state
        .item_repo
        .find(&server_id, &external_id)
        .await?
        .ok_or_else(|| {
            CuratorError::NotFound(format!("Item {}/{} not found", server_id, external_id))
        })?;
    Ok(Json(item))
}

/// Handler for POST /api/v1/libraries/:id/analyze
///
/// The body is optional; `{"contentType": "anime"}` narrows the analysis.
pub async fn analyze_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
    options: Option<Json<AnalyzeOptions>>,
) -> Result<impl IntoResponse> {
    let options = options.map(|Json(o)| o).unwrap_or_default();
    Ok(Json(state.pattern_analyzer.analyze_library(&id, options).await?))
}

/// Handler for GET /api/v1/libraries/:id/patterns
pub async fn get_patterns(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.pattern_analyzer.get_suggestions(&id).await?))
}

/// Handler for POST /api/v1/libraries/:id/patterns/dismiss
pub async fn dismiss_patterns(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.pattern_analyzer.dismiss(&id).await?;
    Ok(Json(MessageResponse::new(format!(
        "Pattern suggestions for library {} dismissed",
        id
    ))))
}

async fn find_library(state: &AppState, id: &str) -> Result<Library> {
    state
        .library_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| CuratorError::NotFound(format!("Library {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, slow_state, test_state};
    use super::*;
    use crate::core::content_type::build_metadata;
    use crate::db::models::{CatalogItem, SyncStatus};
    use crate::db::repository::tests_support::{insert_connection, insert_library};
    use axum::http::Method;
    use serde_json::json;

    fn item(library_id: &str, external_id: &str, title: &str, genres: &[&str]) -> CatalogItem {
        let genres: Vec<String> = genres.iter().map(|g| g.to_string()).collect();
        CatalogItem {
            server_id: "conn-1".to_string(),
            external_id: external_id.to_string(),
            library_id: library_id.to_string(),
            tmdb_id: None,
            imdb_id: None,
            tvdb_id: None,
            title: title.to_string(),
            year: Some(2001),
            media_type: "movie".to_string(),
            metadata: build_metadata(json!({}), None),
            genres,
            tags: vec![],
            collections: vec![],
            studio: None,
            content_rating: Some("PG".to_string()),
            content_hash: format!("hash-{}", external_id),
            last_synced: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_library_requires_existing_connection() {
        let state = test_state();
        let body = json!({
            "providerConnectionId": "nope",
            "externalId": "1",
            "name": "Movies",
            "mediaType": "movie",
        });
        let (status, _) = send(app(&state), Method::POST, "/api/v1/libraries", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        insert_connection(&state.db, "conn-1").await;
        let body = json!({
            "providerConnectionId": "conn-1",
            "externalId": "1",
            "name": "Movies",
            "mediaType": "Movie",
            "ruleSet": {"genres": ["Animation"]},
        });
        let (status, created) =
            send(app(&state), Method::POST, "/api/v1/libraries", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["mediaType"], "movie");
        assert_eq!(created["enabled"], true);

        let (status, fetched) = send(
            app(&state),
            Method::GET,
            &format!("/api/v1/libraries/{}", created["id"].as_str().unwrap()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["name"], "Movies");
    }

    #[tokio::test]
    async fn test_items_are_paged() {
        let state = test_state();
        insert_connection(&state.db, "conn-1").await;
        insert_library(&state.db, "conn-1", "lib-1").await;
        for (i, title) in ["Alpha", "Bravo", "Charlie"].iter().enumerate() {
            state
                .item_repo
                .upsert(&item("lib-1", &format!("e{}", i), title, &["Drama"]))
                .await
                .unwrap();
        }

        let (status, page) = send(
            app(&state),
            Method::GET,
            "/api/v1/libraries/lib-1/items?offset=1&limit=1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 3);
        assert_eq!(page["items"].as_array().unwrap().len(), 1);
        assert_eq!(page["items"][0]["title"], "Bravo");

        let (status, single) =
            send(app(&state), Method::GET, "/api/v1/items/conn-1/e2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(single["title"], "Charlie");

        let (status, _) = send(app(&state), Method::GET, "/api/v1/items/conn-1/zz", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_analyze_then_dismiss() {
        let state = test_state();
        insert_connection(&state.db, "conn-1").await;
        insert_library(&state.db, "conn-1", "lib-1").await;
        for i in 0..4 {
            state
                .item_repo
                .upsert(&item("lib-1", &format!("e{}", i), "Title", &["Animation"]))
                .await
                .unwrap();
        }

        let (status, _) =
            send(app(&state), Method::GET, "/api/v1/libraries/lib-1/patterns", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, analysis) =
            send(app(&state), Method::POST, "/api/v1/libraries/lib-1/analyze", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(analysis["itemsAnalyzed"], 4);

        let (status, _) = send(
            app(&state),
            Method::POST,
            "/api/v1/libraries/lib-1/patterns/dismiss",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, suggestion) =
            send(app(&state), Method::GET, "/api/v1/libraries/lib-1/patterns", None).await;
        assert_eq!(suggestion["dismissed"], true);
    }

    #[tokio::test]
    async fn test_sync_outlives_abandoned_request() {
        let state = slow_state(std::time::Duration::from_millis(300)).await;

        let request = send(app(&state), Method::POST, "/api/v1/libraries/lib-1/sync", None);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), request)
                .await
                .is_err()
        );

        let mut runs = Vec::new();
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            runs = state.sync_engine.list_runs("lib-1", 10).await.unwrap();
            if runs.first().map(|r| r.status == SyncStatus::Completed) == Some(true) {
                break;
            }
        }
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, SyncStatus::Completed);
        assert!(runs[0].completed_at.is_some());
        assert_eq!(runs[0].items_added, 1);
    }

    #[tokio::test]
    async fn test_sync_of_unknown_library_is_not_found() {
        let state = test_state();
        let (status, _) =
            send(app(&state), Method::POST, "/api/v1/libraries/missing/sync?full=true", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
