//! Stateful conversion of file events into tree and content diffs.
//!
//! The generator only reports deltas relative to state it has already seen.
//! Events for unknown paths are treated as stale duplicates and ignored; the
//! generator never re-derives state from the filesystem to correct drift.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::probe::hash_bytes;
use super::types::{
    AddedEntry, DiffType, EntryKind, FileContentDiff, FileEvent, FileEventKind, FileMetadata,
    FileTreeDiff, ModifiedEntry, MovedEntry,
};

/// Holds the last known tree state and broadcast content hashes for one root.
///
/// Not synchronized: one generator belongs to one processing thread.
#[derive(Debug)]
pub struct DiffGenerator {
    root: PathBuf,
    tree_state: HashMap<String, FileMetadata>,
    content_hashes: HashMap<String, String>,
}

impl DiffGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tree_state: HashMap::new(),
            content_hashes: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load a snapshot walk as the last known state.
    ///
    /// The content hash of every seeded file counts as already delivered.
    pub fn seed(&mut self, entries: impl IntoIterator<Item = (String, FileMetadata)>) {
        for (path, metadata) in entries {
            if !metadata.content_hash.is_empty() {
                self.content_hashes
                    .insert(path.clone(), metadata.content_hash.clone());
            }
            self.tree_state.insert(path, metadata);
        }
        debug!("Seeded diff generator with {} entries", self.tree_state.len());
    }

    /// Convert one event into a structural diff, or `None` when nothing changed.
    pub fn process_event(&mut self, event: &FileEvent) -> Option<FileTreeDiff> {
        let mut diff = FileTreeDiff::default();

        match event.kind {
            FileEventKind::Created => {
                if let Some(metadata) = &event.metadata {
                    self.tree_state.insert(event.path.clone(), metadata.clone());
                    diff.added.push(AddedEntry {
                        path: event.path.clone(),
                        // only files are tracked; directories are implied by their paths
                        entry_type: EntryKind::File,
                        metadata: metadata.clone(),
                    });
                }
            }
            FileEventKind::Deleted => {
                if self.tree_state.remove(&event.path).is_some() {
                    self.content_hashes.remove(&event.path);
                    diff.removed.push(event.path.clone());
                }
            }
            FileEventKind::Moved | FileEventKind::Renamed => {
                if let Some(old_path) = &event.old_path {
                    if let Some(metadata) = self.tree_state.remove(old_path) {
                        self.tree_state.insert(event.path.clone(), metadata);
                        if let Some(hash) = self.content_hashes.remove(old_path) {
                            self.content_hashes.insert(event.path.clone(), hash);
                        }
                        diff.moved.push(MovedEntry {
                            old_path: old_path.clone(),
                            new_path: event.path.clone(),
                        });
                    }
                }
            }
            FileEventKind::Modified => {
                if let Some(metadata) = &event.metadata {
                    if let Some(known) = self.tree_state.get_mut(&event.path) {
                        *known = metadata.clone();
                        diff.modified.push(ModifiedEntry {
                            path: event.path.clone(),
                            metadata: metadata.clone(),
                        });
                    }
                }
            }
        }

        if diff.is_empty() {
            debug!("No tree change for {} event on {}", event.kind, event.path);
            None
        } else {
            Some(diff)
        }
    }

    /// Full-content diff for `path` when its bytes differ from the last broadcast.
    ///
    /// A path never seen before always yields the complete content.
    pub fn generate_content_diff(&mut self, path: &str) -> io::Result<Option<FileContentDiff>> {
        let full_path = self.root.join(path);
        if !full_path.is_file() {
            return Ok(None);
        }

        // hash and content come from the same read
        let bytes = fs::read(&full_path)?;
        let hash = hash_bytes(&bytes);
        if self.content_hashes.get(path) == Some(&hash) {
            return Ok(None);
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        self.content_hashes.insert(path.to_string(), hash.clone());

        Ok(Some(FileContentDiff {
            path: path.to_string(),
            hash,
            diff_type: DiffType::Full,
            content,
        }))
    }

    /// Forget all tree state and content hashes.
    pub fn reset(&mut self) {
        self.tree_state.clear();
        self.content_hashes.clear();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tree_state.contains_key(path)
    }

    pub fn metadata(&self, path: &str) -> Option<&FileMetadata> {
        self.tree_state.get(path)
    }

    pub fn tracked_paths(&self) -> impl Iterator<Item = &str> {
        self.tree_state.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tree_state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree_state.is_empty()
    }
}
