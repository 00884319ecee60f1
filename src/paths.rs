//! Conversions between absolute paths and tree-relative path strings.

use std::path::{Component, Path, PathBuf};

/// Express `path` relative to `root` with `/` separators.
///
/// Relative inputs are made absolute against the working directory first.
/// Returns `None` for the root itself or anything outside it.
pub fn relative_string(root: &Path, path: &Path) -> Option<String> {
    let absolute = std::path::absolute(path).ok()?;
    let rel = absolute.strip_prefix(root).ok()?;

    let parts: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Lexically normalize a client-supplied relative path.
///
/// Leading separators are ignored and `.`/`..` are resolved; returns `None`
/// when the path would climb above the root.
pub fn normalize_relative(rel: &str) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();

    for component in Path::new(rel.trim_start_matches(['/', '\\'])).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    Some(normalized)
}
