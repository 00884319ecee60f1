//! Read-only access to files below a watch root.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::diff::probe::unix_seconds;
use crate::diff::EntryKind;
use crate::paths::{normalize_relative, relative_string};

#[derive(Error, Debug)]
pub enum FileAccessError {
    #[error("Path is outside the watch root: {0}")]
    OutsideRoot(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub modified: f64,
}

/// Resolves client-supplied relative paths against a canonical root
#[derive(Debug, Clone)]
pub struct FileReader {
    root: PathBuf,
}

impl FileReader {
    pub fn new(root: &Path) -> io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path for `rel`, guaranteed to be inside the root.
    ///
    /// Symlinks are followed, so a link pointing out of the tree is rejected.
    fn resolve(&self, rel: &str) -> Result<PathBuf, FileAccessError> {
        let normalized =
            normalize_relative(rel).ok_or_else(|| FileAccessError::OutsideRoot(rel.to_string()))?;

        let canonical = self
            .root
            .join(normalized)
            .canonicalize()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => FileAccessError::NotFound(rel.to_string()),
                _ => FileAccessError::Io {
                    path: rel.to_string(),
                    source: e,
                },
            })?;

        if !canonical.starts_with(&self.root) {
            return Err(FileAccessError::OutsideRoot(rel.to_string()));
        }
        Ok(canonical)
    }

    /// Contents of a file as text, invalid UTF-8 replaced
    pub fn read_file(&self, rel: &str) -> Result<String, FileAccessError> {
        let path = self.resolve(rel)?;
        if !path.is_file() {
            return Err(FileAccessError::NotAFile(rel.to_string()));
        }

        let bytes = fs::read(&path).map_err(|e| FileAccessError::Io {
            path: rel.to_string(),
            source: e,
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn file_info(&self, rel: &str) -> Result<FileInfo, FileAccessError> {
        let path = self.resolve(rel)?;
        let meta = fs::metadata(&path).map_err(|e| FileAccessError::Io {
            path: rel.to_string(),
            source: e,
        })?;

        let entry_type = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(FileInfo {
            name,
            entry_type,
            path: relative_string(&self.root, &path).unwrap_or_else(|| ".".to_string()),
            size: meta.is_file().then(|| meta.len()),
            modified: meta.modified().map(unix_seconds).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reader() -> (tempfile::TempDir, FileReader) {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn f() {}").unwrap();
        let reader = FileReader::new(dir.path()).unwrap();
        (dir, reader)
    }

    #[test]
    fn test_read_file() {
        let (_dir, reader) = reader();
        assert_eq!(reader.read_file("src/lib.rs").unwrap(), "pub fn f() {}");
        assert_eq!(reader.read_file("./src/../src/lib.rs").unwrap(), "pub fn f() {}");
    }

    #[test]
    fn test_read_rejects_traversal() {
        let (_dir, reader) = reader();
        assert!(matches!(
            reader.read_file("../etc/passwd"),
            Err(FileAccessError::OutsideRoot(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_read_rejects_symlink_escape() {
        let (dir, reader) = reader();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("link")).unwrap();

        assert!(matches!(
            reader.read_file("link"),
            Err(FileAccessError::OutsideRoot(_))
        ));
    }

    #[test]
    fn test_read_missing_and_directory() {
        let (_dir, reader) = reader();
        assert!(matches!(
            reader.read_file("nope.txt"),
            Err(FileAccessError::NotFound(_))
        ));
        assert!(matches!(
            reader.read_file("src"),
            Err(FileAccessError::NotAFile(_))
        ));
    }

    #[test]
    fn test_file_info() {
        let (_dir, reader) = reader();

        let info = reader.file_info("src/lib.rs").unwrap();
        assert_eq!(info.name, "lib.rs");
        assert_eq!(info.path, "src/lib.rs");
        assert_eq!(info.entry_type, EntryKind::File);
        assert_eq!(info.size, Some(13));
        assert!(info.modified > 0.0);

        let dir_info = reader.file_info("src").unwrap();
        assert_eq!(dir_info.entry_type, EntryKind::Directory);
        assert_eq!(dir_info.size, None);

        let json = serde_json::to_value(&dir_info).unwrap();
        assert_eq!(json["type"], "directory");
        assert!(json.get("size").is_none());
    }
}
