use anyhow::{Context, Result};
use std::path::Path;

use crate::snapshot::SnapshotBuilder;
use crate::watcher::PathFilter;
use crate::Config;

/// Print the snapshot tree of `root` as pretty JSON
pub async fn run(root: &Path, config: &Config) -> Result<()> {
    let builder = SnapshotBuilder::new(root, PathFilter::new(&config.watcher.ignore_patterns));
    let tree = tokio::task::spawn_blocking(move || builder.tree())
        .await
        .context("Snapshot task failed")??;

    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}
