//! Metadata probing and diff generation.

pub mod generator;
pub mod probe;
pub mod types;

pub use generator::DiffGenerator;
pub use probe::{hash_bytes, hash_file, probe};
pub use types::{
    AddedEntry, DiffType, EntryKind, FileContentDiff, FileEvent, FileEventKind, FileMetadata,
    FileTreeDiff, ModifiedEntry, MovedEntry,
};
