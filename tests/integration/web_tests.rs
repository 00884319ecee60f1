use anyhow::Result;
use axum::body::to_bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;

use filecast::events::parse_frame;
use filecast::files::FileReader;
use filecast::snapshot::SnapshotBuilder;
use filecast::watcher::PathFilter;
use filecast::web::handlers::{self, CLIENT_ID_HEADER};
use filecast::web::AppState;
use filecast::Config;

use crate::helpers::test_harness::{TestHarness, EVENT_TIMEOUT};

fn app_state(harness: &TestHarness) -> Result<AppState> {
    Ok(AppState::new(
        harness.hub.clone(),
        harness.path().to_path_buf(),
        Config::default(),
        FileReader::new(harness.path())?,
        SnapshotBuilder::new(harness.path(), PathFilter::default()),
    ))
}

async fn json_body(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn client_headers(id: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CLIENT_ID_HEADER, HeaderValue::from_static(id));
    headers
}

#[tokio::test]
async fn test_event_stream_starts_with_initial_snapshot() -> Result<()> {
    let harness = TestHarness::new()?;
    harness.create_file("a.txt", "hi")?;
    let state = app_state(&harness)?;

    let response = handlers::file_events(State(state), client_headers("web-client")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.headers()[CLIENT_ID_HEADER], "web-client");
    assert!(harness.hub.events().is_connected("web-client"));

    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(EVENT_TIMEOUT, body.next())
        .await?
        .expect("stream ended")?;
    let (event, json) = parse_frame(std::str::from_utf8(&chunk)?).expect("frame");
    assert_eq!(event, "initial");
    assert_eq!(json["data"]["children"][0]["path"], "a.txt");

    // closing the stream releases the subscription
    drop(body);
    assert!(!harness.hub.events().is_connected("web-client"));
    assert!(harness.hub.active_roots().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_event_stream_assigns_client_id() -> Result<()> {
    let harness = TestHarness::new()?;
    let state = app_state(&harness)?;

    let response = handlers::file_events(State(state), HeaderMap::new()).await;
    let id = response.headers()[CLIENT_ID_HEADER].to_str()?.to_string();
    assert!(uuid::Uuid::parse_str(&id).is_ok());
    assert!(harness.hub.events().is_connected(&id));
    Ok(())
}

#[tokio::test]
async fn test_last_event_id_endpoint() -> Result<()> {
    let harness = TestHarness::new()?;
    let state = app_state(&harness)?;

    let missing = handlers::last_event_id(State(state.clone()), HeaderMap::new()).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let unknown = handlers::last_event_id(State(state.clone()), client_headers("nobody")).await;
    assert_eq!(unknown.status(), StatusCode::OK);
    assert!(json_body(unknown).await?["lastEventId"].is_null());

    let _sub = harness.subscribe("known")?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let known = handlers::last_event_id(State(state), client_headers("known")).await;
    assert!(json_body(known).await?["lastEventId"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_file_endpoints() -> Result<()> {
    let harness = TestHarness::new()?;
    harness.create_file("docs/readme.md", "# title")?;
    let state = app_state(&harness)?;

    let tree = handlers::file_tree(State(state.clone())).await;
    assert_eq!(tree.status(), StatusCode::OK);
    let tree = json_body(tree).await?;
    assert_eq!(tree["children"][0]["children"][0]["path"], "docs/readme.md");

    let content =
        handlers::file_content(State(state.clone()), Path("docs/readme.md".to_string())).await;
    assert_eq!(content.status(), StatusCode::OK);
    assert_eq!(content.headers()["content-type"], "text/markdown");
    let bytes = to_bytes(content.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"# title");

    let info = handlers::file_info(State(state.clone()), Path("docs".to_string())).await;
    let info = json_body(info).await?;
    assert_eq!(info["type"], "directory");
    assert_eq!(info["name"], "docs");

    let escaped = handlers::file_content(State(state.clone()), Path("../x".to_string())).await;
    assert_eq!(escaped.status(), StatusCode::FORBIDDEN);

    let missing = handlers::file_info(State(state), Path("nope.txt".to_string())).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_health_and_metrics() -> Result<()> {
    filecast::metrics::register_metrics();

    let health = handlers::health().await.into_response();
    assert_eq!(json_body(health).await?["status"], "ok");

    let metrics = handlers::metrics_handler().await.into_response();
    let bytes = to_bytes(metrics.into_body(), usize::MAX).await?;
    assert!(std::str::from_utf8(&bytes)?.contains("filecast_"));
    Ok(())
}
