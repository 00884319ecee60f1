use anyhow::{bail, Result};
use std::path::Path;
use tracing::info;

use crate::Config;

pub async fn run(root: &Path) -> Result<()> {
    if Config::is_initialized(root) {
        bail!(
            "filecast is already initialized in {:?}",
            Config::config_dir(root)
        );
    }

    let config = Config::default();
    config.save(root)?;

    info!("Initialized filecast in {:?}", Config::config_dir(root));
    println!(
        "✓ Created {} with default configuration",
        Config::config_dir(root).display()
    );
    println!("\nNext steps:");
    println!("  1. Edit .filecast/config.toml to adjust the watcher and server");
    println!("  2. Run 'filecast serve' to start streaming events");

    Ok(())
}
