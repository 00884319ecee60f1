//! Point-in-time views of the watch root.
//!
//! `tree` produces the nested structure served to clients; `entries` produces
//! the flat, fingerprinted list that seeds a diff generator.

use anyhow::{bail, Context, Result};
use ignore::{DirEntry, WalkBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::diff::{probe, EntryKind, FileMetadata};
use crate::paths::relative_string;
use crate::watcher::PathFilter;

/// One node of the nested file tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryKind,
    /// Tree-relative path, `.` for the root
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileTreeNode>>,
}

impl FileTreeNode {
    fn directory(name: String, path: String) -> Self {
        Self {
            name,
            entry_type: EntryKind::Directory,
            path,
            size: None,
            modified: None,
            children: Some(Vec::new()),
        }
    }

    /// Find a node by tree-relative path
    pub fn find(&self, path: &str) -> Option<&FileTreeNode> {
        if self.path == path {
            return Some(self);
        }
        self.children
            .as_ref()?
            .iter()
            .find_map(|child| child.find(path))
    }

    /// Number of file nodes below this one
    pub fn file_count(&self) -> usize {
        match &self.children {
            Some(children) => children.iter().map(FileTreeNode::file_count).sum(),
            None => 1,
        }
    }
}

/// Walks the watch root with the same exclusions the watcher applies
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    root: PathBuf,
    filter: PathFilter,
}

impl SnapshotBuilder {
    pub fn new(root: impl Into<PathBuf>, filter: PathFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk everything below `start`, depth-first, siblings sorted by name
    fn walk(&self, start: &Path) -> impl Iterator<Item = DirEntry> {
        let root = self.root.clone();
        let filter = self.filter.clone();

        let mut builder = WalkBuilder::new(start);
        builder
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                entry
                    .path()
                    .strip_prefix(&root)
                    .map(|rel| !filter.is_excluded(rel))
                    .unwrap_or(false)
            });

        builder
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry during snapshot: {}", e);
                    None
                }
            })
            .filter(|entry| entry.depth() > 0)
    }

    /// Nested tree of the current root
    pub fn tree(&self) -> Result<FileTreeNode> {
        if !self.root.is_dir() {
            bail!("Watch root is not a directory: {}", self.root.display());
        }

        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tree = FileTreeNode::directory(name, ".".to_string());

        for entry in self.walk(&self.root) {
            let Some(rel) = relative_string(&self.root, entry.path()) else {
                continue;
            };
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);

            let node = if is_dir {
                FileTreeNode::directory(entry.file_name().to_string_lossy().into_owned(), rel)
            } else {
                let meta = entry
                    .metadata()
                    .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
                FileTreeNode {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    entry_type: EntryKind::File,
                    path: rel,
                    size: Some(meta.len()),
                    modified: meta.modified().ok().map(crate::diff::probe::unix_seconds),
                    children: None,
                }
            };

            insert_node(&mut tree, node);
        }

        debug!(
            "Built snapshot tree of {} with {} files",
            self.root.display(),
            tree.file_count()
        );
        Ok(tree)
    }

    /// Flat list of files with probed metadata
    ///
    /// Files that vanish or cannot be read mid-walk are skipped.
    pub fn entries(&self) -> Vec<(String, FileMetadata)> {
        self.entries_under(&self.root)
    }

    /// Same as `entries`, limited to the subtree at `dir`
    pub fn entries_under(&self, dir: &Path) -> Vec<(String, FileMetadata)> {
        self.walk(dir)
            .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let rel = relative_string(&self.root, entry.path())?;
                match probe(entry.path()) {
                    Ok(metadata) => Some((rel, metadata)),
                    Err(e) => {
                        warn!("Skipping {} during snapshot: {}", rel, e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Attach `node` under its parent directory.
///
/// The walk yields parents before their children, so the parent already exists.
fn insert_node(tree: &mut FileTreeNode, node: FileTreeNode) {
    let parent_path = match node.path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => ".".to_string(),
    };

    let mut current = tree;
    if parent_path != "." {
        for segment_end in segment_ends(&parent_path) {
            let prefix = &parent_path[..segment_end];
            let Some(children) = current.children.as_mut() else {
                return;
            };
            match children.iter_mut().find(|c| c.path == prefix) {
                Some(child) => current = child,
                None => return,
            }
        }
    }

    if let Some(children) = current.children.as_mut() {
        children.push(node);
    }
}

/// Byte offsets ending each successive prefix of `a/b/c`: `a`, `a/b`, `a/b/c`
fn segment_ends(path: &str) -> impl Iterator<Item = usize> + '_ {
    path.match_indices('/')
        .map(|(i, _)| i)
        .chain(std::iter::once(path.len()))
}
