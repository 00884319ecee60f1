//! Per-path debouncing of filesystem notifications.
//!
//! The first notification for a path opens a window; later ones inside the
//! window are folded into it. A path is released once its window has closed,
//! so the caller inspects the file after the burst that touched it instead of
//! at its first, possibly half-written, state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct PendingPath {
    path: PathBuf,
    opened: Instant,
}

/// Collects changed paths and releases each at most once per window
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<String, PendingPath>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a notification for `rel` at `now`.
    ///
    /// Returns true when it was folded into a window that is already open.
    pub fn observe(&mut self, rel: &str, path: &Path, now: Instant) -> bool {
        match self.pending.get_mut(rel) {
            Some(pending) => {
                pending.path = path.to_path_buf();
                true
            }
            None => {
                self.pending.insert(
                    rel.to_string(),
                    PendingPath {
                        path: path.to_path_buf(),
                        opened: now,
                    },
                );
                false
            }
        }
    }

    /// Remove and return every path whose window has closed by `now`, sorted by path
    pub fn due(&mut self, now: Instant) -> Vec<(String, PathBuf)> {
        let window = self.window;
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.opened) >= window)
            .map(|(rel, _)| rel.clone())
            .collect();

        let mut released: Vec<_> = ready
            .into_iter()
            .filter_map(|rel| self.pending.remove(&rel).map(|p| (rel, p.path)))
            .collect();
        released.sort_by(|a, b| a.0.cmp(&b.0));
        released
    }

    /// Withdraw a pending path, e.g. because it was renamed away
    pub fn take(&mut self, rel: &str) -> Option<PathBuf> {
        self.pending.remove(rel).map(|p| p.path)
    }

    /// Withdraw every pending path below the directory `rel`
    pub fn take_under(&mut self, rel: &str) -> Vec<String> {
        let prefix = format!("{}/", rel);
        let matched: Vec<String> = self
            .pending
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in &matched {
            self.pending.remove(key);
        }
        matched
    }

    pub fn is_pending(&self, rel: &str) -> bool {
        self.pending.contains_key(rel)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
