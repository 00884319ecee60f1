//! HTTP request handlers.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::state::AppState;
use crate::events::KEEP_ALIVE_FRAME;
use crate::files::FileAccessError;
use crate::metrics;
use crate::watcher::WatchError;

/// Header carrying a client's stable identity across reconnects
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastEventIdResponse {
    pub last_event_id: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn client_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn access_status(err: &FileAccessError) -> StatusCode {
    match err {
        FileAccessError::OutsideRoot(_) => StatusCode::FORBIDDEN,
        FileAccessError::NotFound(_) => StatusCode::NOT_FOUND,
        FileAccessError::NotAFile(_) => StatusCode::BAD_REQUEST,
        FileAccessError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Open an event stream for the served root.
///
/// GET /api/files/events
pub async fn file_events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let client_id = client_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());

    let hub = state.hub.clone();
    let root = state.root.clone();
    let id = client_id.clone();
    let subscription = match tokio::task::spawn_blocking(move || hub.subscribe(&id, &root)).await {
        Ok(Ok(subscription)) => subscription,
        Ok(Err(e @ (WatchError::RootNotFound(_) | WatchError::NotADirectory(_)))) => {
            warn!(client_id = %client_id, error = %e, "Cannot watch root");
            return error_response(StatusCode::NOT_FOUND, e.to_string());
        }
        Ok(Err(e)) => {
            error!(client_id = %client_id, error = %e, "Failed to start watcher");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        Err(e) => {
            error!(error = %e, "Subscribe task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    info!(client_id = %client_id, "Event stream opened");

    let period = Duration::from_secs(state.config.server.keep_alive_secs.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // ends when the connection is dropped; dropping the subscription releases the lease
    let stream = futures::stream::unfold(
        (subscription, ticker),
        |(mut subscription, mut ticker)| async move {
            tokio::select! {
                frame = subscription.recv() => {
                    frame.map(|f| (Ok::<_, Infallible>(f), (subscription, ticker)))
                }
                _ = ticker.tick() => {
                    Some((Ok(KEEP_ALIVE_FRAME.to_string()), (subscription, ticker)))
                }
            }
        },
    );

    let mut response = Response::new(Body::from_stream(stream));
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    if let Ok(value) = HeaderValue::from_str(&client_id) {
        response_headers.insert(CLIENT_ID_HEADER, value);
    }
    response
}

/// Most recent event id delivered to a client.
///
/// GET /api/files/events/last-event-id
pub async fn last_event_id(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(client_id) = client_id(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing X-Client-ID header");
    };

    Json(LastEventIdResponse {
        last_event_id: state
            .hub
            .events()
            .last_event_id(&client_id)
            .map(|id| id.to_string()),
    })
    .into_response()
}

/// Nested tree of the served root.
///
/// GET /api/files/tree
pub async fn file_tree(State(state): State<AppState>) -> Response {
    let snapshot = state.snapshot.clone();
    match tokio::task::spawn_blocking(move || snapshot.tree()).await {
        Ok(Ok(tree)) => Json(tree).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "Failed to build file tree");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
        Err(e) => {
            error!(error = %e, "File tree task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// Raw file content.
///
/// GET /api/files/content/{*path}
pub async fn file_content(
    State(state): State<AppState>,
    Path(file_path): Path<String>,
) -> Response {
    match state.reader.read_file(&file_path) {
        Ok(content) => {
            let content_type = mime_guess::from_path(&file_path)
                .first_or_text_plain()
                .to_string();
            ([(header::CONTENT_TYPE, content_type)], content).into_response()
        }
        Err(e) => {
            warn!(path = %file_path, error = %e, "Failed to read file");
            error_response(access_status(&e), e.to_string())
        }
    }
}

/// Metadata for one file or directory.
///
/// GET /api/files/info/{*path}
pub async fn file_info(State(state): State<AppState>, Path(file_path): Path<String>) -> Response {
    match state.reader.file_info(&file_path) {
        Ok(info) => Json(info).into_response(),
        Err(e) => {
            warn!(path = %file_path, error = %e, "Failed to stat file");
            error_response(access_status(&e), e.to_string())
        }
    }
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus metrics endpoint.
///
/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    let output = metrics::gather_metrics();
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], output)
}
