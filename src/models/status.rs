//! Filesystem-facing status records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fs::status;

/// Status of a single path as the filesystem façade reports it.
///
/// Always built fresh from store metadata; never cached between calls.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct FileStatus {
    pub path: String,
    pub length: u64,
    pub is_directory: bool,
    pub replication: u16,
    pub block_size: u64,
    pub modification_time: DateTime<Utc>,
}

impl FileStatus {
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }

    /// A directory status carrying no store metadata (root emulation).
    /// Uses the same fallbacks as a projected directory.
    pub fn synthetic_directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            length: status::UNKNOWN_LENGTH,
            is_directory: true,
            replication: status::UNKNOWN_REPLICATION_FACTOR,
            block_size: status::UNKNOWN_BLOCK_SIZE,
            modification_time: DateTime::UNIX_EPOCH,
        }
    }
}

/// Where the bytes of a file range live.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BlockLocation {
    pub names: Vec<String>,
    pub hosts: Vec<String>,
    pub offset: u64,
    pub length: u64,
}

/// A status plus the block locations of the file it describes.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LocatedStatus {
    pub status: FileStatus,
    pub block_locations: Vec<BlockLocation>,
}

impl LocatedStatus {
    /// Files get a single block spanning the whole object; the store does
    /// not expose placement, so the host is always `localhost`.
    pub fn locate(status: FileStatus) -> Self {
        let block_locations = if status.is_file() {
            vec![BlockLocation {
                names: vec!["localhost:9866".into()],
                hosts: vec!["localhost".into()],
                offset: 0,
                length: status.length,
            }]
        } else {
            Vec::new()
        };

        Self {
            status,
            block_locations,
        }
    }
}
