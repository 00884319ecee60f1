//! Shared state for the HTTP handlers.

use std::path::PathBuf;

use crate::config::Config;
use crate::files::FileReader;
use crate::hub::WatchHub;
use crate::snapshot::SnapshotBuilder;

/// Cloned into every handler; the hub is internally reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Watch sessions and connection queues
    pub hub: WatchHub,
    /// Canonical root served by this instance
    pub root: PathBuf,
    pub config: Config,
    pub reader: FileReader,
    pub snapshot: SnapshotBuilder,
}

impl AppState {
    pub fn new(
        hub: WatchHub,
        root: PathBuf,
        config: Config,
        reader: FileReader,
        snapshot: SnapshotBuilder,
    ) -> Self {
        Self {
            hub,
            root,
            config,
            reader,
            snapshot,
        }
    }
}
