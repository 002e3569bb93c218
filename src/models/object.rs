//! Represents an object (file) or directory as reported by the remote store.

use serde::{Deserialize, Serialize};

use super::checksum::Md5Digest;

/// Entry type reported by the store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Object,
    Directory,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Object => "object",
            ObjectKind::Directory => "directory",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "object" => Some(ObjectKind::Object),
            "directory" => Some(ObjectKind::Directory),
            _ => None,
        }
    }
}

/// Metadata for a single remote key, produced once per `head` or listing
/// entry and never mutated afterwards.
///
/// Every field except the path is optional because the store omits fields
/// freely, most often in listing responses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Absolute key in the store namespace (e.g. `/alice/stor/a.txt`).
    pub path: String,

    /// Entry type; absent means "not known to be a directory".
    pub kind: Option<ObjectKind>,

    /// Size in bytes.
    pub size: Option<u64>,

    /// Number of copies the store keeps.
    pub durability: Option<u16>,

    /// Raw modification timestamp as sent by the store (RFC 3339).
    pub last_modified: Option<String>,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Server-computed MD5 of the whole object.
    pub content_md5: Option<Md5Digest>,
}

impl ObjectMetadata {
    /// Metadata with only a path set.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: None,
            size: None,
            durability: None,
            last_modified: None,
            content_type: None,
            content_md5: None,
        }
    }

    pub fn object(path: impl Into<String>, size: u64) -> Self {
        Self {
            kind: Some(ObjectKind::Object),
            size: Some(size),
            ..Self::new(path)
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            kind: Some(ObjectKind::Directory),
            ..Self::new(path)
        }
    }

    pub fn with_durability(mut self, durability: u16) -> Self {
        self.durability = Some(durability);
        self
    }

    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_md5(mut self, digest: Md5Digest) -> Self {
        self.content_md5 = Some(digest);
        self
    }

    pub fn is_directory(&self) -> bool {
        self.kind == Some(ObjectKind::Directory)
    }

    /// Final path segment, or the path itself for the root.
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        match trimmed.rsplit_once('/') {
            Some((_, name)) if !name.is_empty() => name,
            _ => &self.path,
        }
    }
}
