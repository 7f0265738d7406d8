//! API routes

use crate::api::handlers::{
    // Provider connections
    activate_connection, create_connection, list_connections, test_connection,
    // Libraries, sync and the catalog mirror
    analyze_library, create_library, dismiss_patterns, get_item, get_library, get_patterns,
    get_sync_run, list_libraries, list_library_items, list_sync_runs, sync_library,
    // Rules and classification
    classify_request, create_rule, delete_rule, get_rule, list_rules, preview_rule,
    // Conversational rule builder
    generate_rule, get_session, send_message, start_session,
    // Scheduled tasks
    create_task, delete_task, get_task, list_tasks, run_task, update_task,
    health_check, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the API routes
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Provider connections
        .route("/api/v1/connections", get(list_connections).post(create_connection))
        .route("/api/v1/connections/:id/activate", post(activate_connection))
        .route("/api/v1/connections/:id/test", post(test_connection))
        // Libraries
        .route("/api/v1/libraries", get(list_libraries).post(create_library))
        .route("/api/v1/libraries/:id", get(get_library))
        .route("/api/v1/libraries/:id/sync", post(sync_library))
        .route("/api/v1/libraries/:id/sync-runs", get(list_sync_runs))
        .route("/api/v1/libraries/:id/items", get(list_library_items))
        .route("/api/v1/libraries/:id/analyze", post(analyze_library))
        .route("/api/v1/libraries/:id/patterns", get(get_patterns))
        .route("/api/v1/libraries/:id/patterns/dismiss", post(dismiss_patterns))
        .route("/api/v1/sync-runs/:id", get(get_sync_run))
        .route("/api/v1/items/:server_id/:external_id", get(get_item))
        // Rules
        .route("/api/v1/rules", get(list_rules).post(create_rule))
        .route("/api/v1/rules/preview", post(preview_rule))
        .route("/api/v1/rules/:id", get(get_rule).delete(delete_rule))
        .route("/api/v1/classify", post(classify_request))
        // Rule builder sessions
        .route("/api/v1/rule-builder/sessions", post(start_session))
        .route("/api/v1/rule-builder/sessions/:id", get(get_session))
        .route("/api/v1/rule-builder/sessions/:id/messages", post(send_message))
        .route("/api/v1/rule-builder/sessions/:id/generate", post(generate_rule))
        // Scheduled tasks
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/v1/tasks/:id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/v1/tasks/:id/run", post(run_task))
        .with_state(state)
}
