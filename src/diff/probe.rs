//! Metadata probe: size, mtime and SHA-256 fingerprint of a single path.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::FileMetadata;

const BLOCK_SIZE: usize = 4096;

/// Hex SHA-256 of a file, read in fixed-size blocks.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; BLOCK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex SHA-256 of bytes already in memory.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Stat and fingerprint `path`.
///
/// Fails if the path vanishes between the stat and the read.
pub fn probe(path: &Path) -> io::Result<FileMetadata> {
    let meta = fs::metadata(path)?;
    let content_hash = if meta.is_dir() {
        String::new()
    } else {
        hash_file(path)?
    };

    Ok(FileMetadata {
        size: meta.len(),
        modified_time: unix_seconds(meta.modified()?),
        content_hash,
    })
}

pub(crate) fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
