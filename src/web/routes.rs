//! Route table for the file event server.

use axum::{routing::get, Router};

use super::handlers;
use super::state::AppState;

/// Build the router with every endpoint mounted
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Event stream
        .route("/api/files/events", get(handlers::file_events))
        .route(
            "/api/files/events/last-event-id",
            get(handlers::last_event_id),
        )
        // File access
        .route("/api/files/tree", get(handlers::file_tree))
        .route("/api/files/content/{*path}", get(handlers::file_content))
        .route("/api/files/info/{*path}", get(handlers::file_info))
        // Health and metrics
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
}
