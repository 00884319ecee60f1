use std::collections::HashSet;
use std::path::{Component, Path};

/// Directories that only ever produce noise for subscribers
const NOISE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "target",
    "dist",
    "build",
];

/// Decides which tree-relative paths are hidden from subscribers.
///
/// Shared by the watcher and the snapshot builder so both see the same tree.
#[derive(Debug, Clone)]
pub struct PathFilter {
    excluded: HashSet<String>,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl PathFilter {
    pub fn new(extra: &[String]) -> Self {
        let excluded = NOISE_DIRS
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().cloned())
            .collect();
        Self { excluded }
    }

    /// True when any component is dot-prefixed or a known noise name
    pub fn is_excluded(&self, relative: &Path) -> bool {
        relative.components().any(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                name.starts_with('.') || self.excluded.contains(name.as_ref())
            }
            _ => false,
        })
    }
}
