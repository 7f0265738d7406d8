use crate::api::models::MessageResponse;
use crate::core::error::Result;
use crate::core::scheduler::{NewTask, TaskUpdate};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use super::{detached, AppState};

/// Handler for GET /api/v1/tasks
pub async fn list_tasks(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.scheduler.list_tasks().await?))
}

/// Handler for POST /api/v1/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(req): Json<NewTask>,
) -> Result<impl IntoResponse> {
    let task = state.scheduler.create_task(req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Handler for GET /api/v1/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.scheduler.get_task(&id).await?))
}

/// Handler for PUT /api/v1/tasks/:id
pub async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TaskUpdate>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.scheduler.update_task(&id, req).await?))
}

/// Handler for DELETE /api/v1/tasks/:id
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.scheduler.delete_task(&id).await?;
    Ok(Json(MessageResponse::new(format!("Task {} deleted", id))))
}

/// Handler for POST /api/v1/tasks/:id/run
///
/// The body is the task with its new lastResult. The run is detached from
/// the request, so its bookkeeping lands even if the client gives up.
pub async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let scheduler = state.scheduler.clone();
    let task = detached(async move { scheduler.run_now(&id).await }).await?;
    Ok(Json(task))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, slow_state, test_state};
    use super::*;
    use crate::db::repository::tests_support::{insert_connection, insert_library};
    use axum::http::Method;
    use serde_json::json;

    #[tokio::test]
    async fn test_task_crud_and_run_now() {
        let state = test_state();
        insert_connection(&state.db, "conn-1").await;
        insert_library(&state.db, "conn-1", "lib-1").await;

        let (status, task) = send(
            app(&state),
            Method::POST,
            "/api/v1/tasks",
            Some(json!({
                "name": "Nightly analysis",
                "taskType": "pattern_analysis",
                "libraryId": "lib-1",
                "intervalMinutes": 1440,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = task["id"].as_str().unwrap().to_string();

        let (status, ran) = send(
            app(&state),
            Method::POST,
            &format!("/api/v1/tasks/{}/run", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ran["runCount"], 1);
        assert_eq!(ran["lastResult"]["success"], true);
        assert!(ran["nextRunAt"].is_string());

        let (status, updated) = send(
            app(&state),
            Method::PUT,
            &format!("/api/v1/tasks/{}", id),
            Some(json!({"enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["enabled"], false);

        let (status, _) = send(
            app(&state),
            Method::DELETE,
            &format!("/api/v1/tasks/{}", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, list) = send(app(&state), Method::GET, "/api/v1/tasks", None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_now_bookkeeping_survives_abandoned_request() {
        let state = slow_state(std::time::Duration::from_millis(300)).await;
        let task = state
            .scheduler
            .create_task(NewTask {
                name: "Slow sync".to_string(),
                task_type: "library_sync".to_string(),
                library_id: Some("lib-1".to_string()),
                interval_minutes: Some(60),
                enabled: false,
                next_run_at: None,
            })
            .await
            .unwrap();

        let uri = format!("/api/v1/tasks/{}/run", task.id);
        let request = send(app(&state), Method::POST, &uri, None);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), request)
                .await
                .is_err()
        );

        let mut stored = state.scheduler.get_task(&task.id).await.unwrap();
        for _ in 0..50 {
            if stored.run_count > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            stored = state.scheduler.get_task(&task.id).await.unwrap();
        }
        assert_eq!(stored.run_count, 1);
        assert!(stored.last_run_at.is_some());
        assert!(stored.next_run_at.is_some());
        assert_eq!(stored.last_result.unwrap()["success"], true);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_task_type() {
        let state = test_state();
        let (status, _) = send(
            app(&state),
            Method::POST,
            "/api/v1/tasks",
            Some(json!({"name": "x", "taskType": "reindex", "intervalMinutes": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
