//! Wire and in-process types for tree and content diffs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size, modification time and content fingerprint of one entry.
///
/// Replaced wholesale whenever a change is observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified_time: f64,
    /// Hex SHA-256 of the bytes, empty for directories
    pub content_hash: String,
}

/// Kinds of filesystem changes fed to the diff generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Created,
    Deleted,
    Modified,
    Moved,
    Renamed,
}

impl fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileEventKind::Created => write!(f, "created"),
            FileEventKind::Deleted => write!(f, "deleted"),
            FileEventKind::Modified => write!(f, "modified"),
            FileEventKind::Moved => write!(f, "moved"),
            FileEventKind::Renamed => write!(f, "renamed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A normalized change for one tree-relative path.
///
/// For moves, `old_path` is the source and `path` the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: String,
    pub old_path: Option<String>,
    pub metadata: Option<FileMetadata>,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
            metadata: None,
        }
    }

    pub fn created(path: impl Into<String>, metadata: Option<FileMetadata>) -> Self {
        Self {
            metadata,
            ..Self::new(FileEventKind::Created, path)
        }
    }

    pub fn modified(path: impl Into<String>, metadata: Option<FileMetadata>) -> Self {
        Self {
            metadata,
            ..Self::new(FileEventKind::Modified, path)
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self::new(FileEventKind::Deleted, path)
    }

    pub fn moved(old_path: impl Into<String>, new_path: impl Into<String>) -> Self {
        Self {
            old_path: Some(old_path.into()),
            ..Self::new(FileEventKind::Moved, new_path)
        }
    }

    /// Whether the file still exists after this event and its bytes may be read
    pub fn needs_content(&self) -> bool {
        matches!(self.kind, FileEventKind::Created | FileEventKind::Modified)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryKind,
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovedEntry {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedEntry {
    pub path: String,
    pub metadata: FileMetadata,
}

/// Structural delta produced by a single filesystem event.
///
/// Never emitted with all four lists empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileTreeDiff {
    pub added: Vec<AddedEntry>,
    pub removed: Vec<String>,
    pub moved: Vec<MovedEntry>,
    pub modified: Vec<ModifiedEntry>,
}

impl FileTreeDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.moved.is_empty()
            && self.modified.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    /// The complete current content
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContentDiff {
    pub path: String,
    pub hash: String,
    pub diff_type: DiffType,
    pub content: String,
}
