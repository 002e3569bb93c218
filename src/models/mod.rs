//! Plain data carried between the remote store and the filesystem façade.
//!
//! `ObjectMetadata` is what the store reports for a key, `FileStatus` is the
//! filesystem-facing projection of it, and `Md5Digest` is the only checksum
//! algorithm the store speaks.

pub mod checksum;
pub mod object;
pub mod status;

pub use checksum::Md5Digest;
pub use object::{ObjectKind, ObjectMetadata};
pub use status::{BlockLocation, FileStatus, LocatedStatus};
