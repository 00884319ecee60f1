//! Watch command implementation
//!
//! Subscribes to the root and prints every framed event to stdout.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tokio::signal;
use tracing::info;

use crate::hub::WatchHub;
use crate::Config;

const CLIENT_ID: &str = "cli";

pub async fn run(root: &Path, mut config: Config, debounce_ms: Option<u64>) -> Result<()> {
    if let Some(ms) = debounce_ms {
        config.watcher.debounce_ms = ms;
    }

    eprintln!("Watching directory: {:?}", root);
    eprintln!("Debounce window: {}ms", config.watcher.debounce_ms);
    eprintln!("Press Ctrl+C to stop.");
    eprintln!();

    let hub = WatchHub::new(config.watcher);
    let subscriber = hub.clone();
    let watch_root = root.to_path_buf();
    let mut subscription =
        tokio::task::spawn_blocking(move || subscriber.subscribe(CLIENT_ID, &watch_root))
            .await
            .context("Subscribe task failed")?
            .with_context(|| format!("Failed to watch {}", root.display()))?;

    let mut stdout = std::io::stdout();
    let mut frames = 0usize;
    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                stdout.write_all(frame.as_bytes())?;
                stdout.flush()?;
                frames += 1;
            }
            result = signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    eprintln!();
    eprintln!("Shutting down...");
    drop(subscription);
    hub.shutdown();

    info!("Watch session ended after {} events", frames);
    Ok(())
}
