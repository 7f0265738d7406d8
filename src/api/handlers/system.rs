use crate::api::models::{HealthResponse, HealthStatus};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use tracing::warn;
use super::AppState;

/// Handler for GET /health
///
/// Answers 503 while the database cannot be reached.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Health check: database unreachable");
            false
        }
    };

    let (code, status) = if database {
        (StatusCode::OK, HealthStatus::Ok)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, HealthStatus::Degraded)
    };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        scheduler_enabled: state.config.scheduler.enabled,
        ai_enabled: state.config.ai.is_enabled(),
        timestamp: Utc::now().timestamp(),
    };
    (code, Json(body))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{app, send, test_state};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_health_check() {
        let state = test_state();
        let (status, body) = send(app(&state), Method::GET, "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], true);
        assert_eq!(body["aiEnabled"], false);
        assert!(body["version"].is_string());
    }
}
