//! Serve command implementation.
//!
//! Starts the HTTP server streaming events for the project root.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::files::FileReader;
use crate::hub::WatchHub;
use crate::snapshot::SnapshotBuilder;
use crate::watcher::PathFilter;
use crate::web::{AppState, WebServer};
use crate::Config;

pub async fn run(
    root: &Path,
    mut config: Config,
    port: Option<u16>,
    host: Option<String>,
    debounce_ms: Option<u64>,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(ms) = debounce_ms {
        config.watcher.debounce_ms = ms;
    }

    let root = root
        .canonicalize()
        .with_context(|| format!("Root directory not found: {}", root.display()))?;

    let reader = FileReader::new(&root)
        .with_context(|| format!("Failed to open root {}", root.display()))?;
    let snapshot = SnapshotBuilder::new(
        root.clone(),
        PathFilter::new(&config.watcher.ignore_patterns),
    );
    let hub = WatchHub::new(config.watcher.clone());

    let host = config.server.host.clone();
    let port = config.server.port;
    info!("Serving {} (debounce {}ms)", root.display(), config.watcher.debounce_ms);

    let state = AppState::new(hub, root, config, reader, snapshot);
    let server = WebServer::new(state);

    server
        .start(&host, port, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
