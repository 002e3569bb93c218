//! Projection of store metadata onto filesystem status records.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{FileStatus, ObjectMetadata};

/// Length reported when the store omits the size.
pub const UNKNOWN_LENGTH: u64 = 1;

/// Replication reported when the store omits the durability level.
pub const UNKNOWN_REPLICATION_FACTOR: u16 = 1;

/// Block size is not a concept of the store.
pub const UNKNOWN_BLOCK_SIZE: u64 = 0;

/// Build the status of `metadata`, reported under `path`.
///
/// Missing fields fall back to fixed values; an unparsable timestamp is
/// logged and reported as the epoch rather than failing the call.
pub fn project(metadata: &ObjectMetadata, path: impl Into<String>) -> FileStatus {
    FileStatus {
        path: path.into(),
        length: metadata.size.unwrap_or(UNKNOWN_LENGTH),
        is_directory: metadata.is_directory(),
        replication: metadata
            .durability
            .unwrap_or(UNKNOWN_REPLICATION_FACTOR),
        block_size: UNKNOWN_BLOCK_SIZE,
        modification_time: modification_time(metadata),
    }
}

/// Status of `metadata` under its own path.
pub fn project_own(metadata: &ObjectMetadata) -> FileStatus {
    project(metadata, metadata.path.clone())
}

fn modification_time(metadata: &ObjectMetadata) -> DateTime<Utc> {
    let Some(raw) = metadata.last_modified.as_deref() else {
        return DateTime::UNIX_EPOCH;
    };

    match parse_timestamp(raw) {
        Some(time) => time,
        None => {
            warn!(
                "Unable to parse modification time [{}] of {}",
                raw, metadata.path
            );
            DateTime::UNIX_EPOCH
        }
    }
}

/// Accepts ISO-8601 / RFC 3339 (listing entries) and RFC 2822 (HTTP
/// `Last-Modified` headers).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|time| time.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_fields_use_fallbacks() {
        let status = project_own(&ObjectMetadata::new("/alice/stor/x"));
        assert_eq!(status.path, "/alice/stor/x");
        assert_eq!(status.length, UNKNOWN_LENGTH);
        assert!(!status.is_directory);
        assert_eq!(status.replication, 1);
        assert_eq!(status.block_size, 0);
        assert_eq!(status.modification_time, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn present_fields_are_projected() {
        let metadata = ObjectMetadata::object("/alice/stor/x", 0)
            .with_durability(3)
            .with_last_modified("2016-04-01T12:30:00.250Z");
        let status = project(&metadata, "~~/stor/x");

        assert_eq!(status.path, "~~/stor/x");
        assert_eq!(status.length, 0);
        assert_eq!(status.replication, 3);
        let expected = Utc.with_ymd_and_hms(2016, 4, 1, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(status.modification_time, expected);
    }

    #[test]
    fn http_date_is_accepted() {
        let metadata = ObjectMetadata::directory("/alice/stor")
            .with_last_modified("Fri, 01 Apr 2016 12:30:00 GMT");
        let status = project_own(&metadata);
        assert!(status.is_directory);
        assert_eq!(
            status.modification_time,
            Utc.with_ymd_and_hms(2016, 4, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn bad_timestamp_degrades_to_epoch() {
        let metadata = ObjectMetadata::object("/a", 5).with_last_modified("yesterday-ish");
        let status = project_own(&metadata);
        assert_eq!(status.modification_time, DateTime::UNIX_EPOCH);
        assert_eq!(status.length, 5);
    }
}
