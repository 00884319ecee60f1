use anyhow::{Context, Result};
use filecast::config::WatcherConfig;
use filecast::events::parse_frame;
use filecast::{Subscription, WatchHub};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Long enough for inotify delivery on a loaded CI machine
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestHarness {
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub hub: WatchHub,
    pub config: WatcherConfig,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        Self::with_config(WatcherConfig::default())
    }

    pub fn with_config(config: WatcherConfig) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().canonicalize()?;
        let hub = WatchHub::new(config.clone());

        Ok(Self {
            temp_dir,
            root,
            hub,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self, client_id: &str) -> Result<Subscription> {
        Ok(self.hub.subscribe(client_id, &self.root)?)
    }

    /// Write through a hidden temp file and rename into place.
    ///
    /// The file appears with its full content in one step, so the watcher
    /// never observes a half-written file.
    pub fn create_file(&self, rel: &str, content: &str) -> Result<PathBuf> {
        let target = self.root.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.root.join(format!(".staging-{}", rel.replace('/', "_")));
        std::fs::write(&staging, content)?;
        std::fs::rename(&staging, &target)?;
        Ok(target)
    }

    /// Overwrite in place without truncating first
    pub fn overwrite_file(&self, rel: &str, content: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(self.root.join(rel))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Let the per-path debounce window expire
    pub async fn settle(&self) {
        tokio::time::sleep(self.config.debounce_window() * 3).await;
    }
}

/// Next event on `subscription` as `(event name, JSON body)`
pub async fn next_event(subscription: &mut Subscription) -> Result<(String, Value)> {
    let frame = tokio::time::timeout(EVENT_TIMEOUT, subscription.recv())
        .await
        .context("Timed out waiting for event")?
        .context("Event stream closed")?;
    parse_frame(&frame).context("Malformed frame")
}

/// Assert nothing arrives for `quiet`
pub async fn expect_no_event(subscription: &mut Subscription, quiet: Duration) {
    if let Ok(Some(frame)) = tokio::time::timeout(quiet, subscription.recv()).await {
        panic!("Unexpected event: {}", frame);
    }
}
