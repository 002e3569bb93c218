//! MD5 of a prefix of a remote object.
//!
//! Small objects are downloaded and hashed here. Above a size threshold the
//! hashing runs next to the data as a remote reduce job and only the hex
//! digest travels back.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use crate::{
    errors::{FsError, FsResult},
    models::{Md5Digest, ObjectMetadata},
    services::client::{JobPhase, JobSpec, ObjectStoreClient, PhaseKind},
};

/// Object size above which checksums are computed by a remote job.
pub const REMOTE_CHECKSUM_THRESHOLD: u64 = 1_048_576;

/// Shell pipeline that prints the hex MD5 of the first `length` bytes of
/// its standard input.
pub fn prefix_md5_command(length: u64) -> String {
    format!("head -c {} | md5sum -b | cut -d' ' -f1", length)
}

/// Chooses between local and remote computation of prefix checksums.
///
/// Not synchronized; one strategy serves one caller at a time.
pub struct ChecksumStrategy {
    client: Arc<dyn ObjectStoreClient>,
    remote_threshold: u64,
}

impl ChecksumStrategy {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self {
            client,
            remote_threshold: REMOTE_CHECKSUM_THRESHOLD,
        }
    }

    pub fn with_remote_threshold(mut self, threshold: u64) -> Self {
        self.remote_threshold = threshold;
        self
    }

    /// MD5 of the first `length` bytes of `key`.
    pub async fn prefix_checksum(&self, key: &str, length: u64) -> FsResult<Md5Digest> {
        let head = self.file_head(key).await?;
        self.checksum_for(&head, length).await
    }

    /// MD5 of the whole object, taken from the store's metadata when it
    /// already carries one.
    pub async fn whole_checksum(&self, key: &str) -> FsResult<Md5Digest> {
        let head = self.file_head(key).await?;
        if let Some(digest) = head.content_md5 {
            debug!("Using server-supplied md5 for {}", key);
            return Ok(digest);
        }

        let length = head.size.unwrap_or(u64::MAX);
        self.checksum_for(&head, length).await
    }

    /// Download the first `length` bytes and hash them here.
    pub async fn checksum_locally(&self, key: &str, length: u64) -> FsResult<Md5Digest> {
        debug!(
            "Calculating checksum of the first {} bytes of {} locally",
            length, key
        );

        let channel = self.client.ranged_read(key, 0).await?;
        let mut stream = ReaderStream::new(channel.take(length));
        let mut digest = md5::Context::new();
        while let Some(chunk) = stream.next().await {
            digest.consume(&chunk?);
        }

        Ok(digest.compute().into())
    }

    /// Hash the first `length` bytes with a remote job and decode its output.
    pub async fn checksum_remotely(&self, key: &str, length: u64) -> FsResult<Md5Digest> {
        debug!(
            "Calculating checksum of the first {} bytes of {} with a remote job",
            length, key
        );

        let job = JobSpec {
            name: format!("range-checksum-{}", Uuid::new_v4()),
            input: key.to_string(),
            phase: JobPhase {
                kind: PhaseKind::Reduce,
                exec: prefix_md5_command(length),
            },
        };

        let mut handle = self.client.submit_job(job).await?;
        let outputs = handle.wait_until_done().await?;
        let job_id = handle.id().to_string();

        let Some(line) = outputs.into_iter().next() else {
            return Err(FsError::checksum_failed(
                job_id,
                "no md5 output from calculation job",
            ));
        };

        Md5Digest::from_hex(&line).map_err(|err| {
            FsError::checksum_failed_by(
                job_id,
                format!("unable to decode [{}] as md5", line.trim()),
                err,
            )
        })
    }

    async fn checksum_for(&self, head: &ObjectMetadata, length: u64) -> FsResult<Md5Digest> {
        match head.size {
            Some(size) if size > self.remote_threshold => {
                self.checksum_remotely(&head.path, length).await
            }
            _ => self.checksum_locally(&head.path, length).await,
        }
    }

    async fn file_head(&self, key: &str) -> FsResult<ObjectMetadata> {
        let head = self.client.head(key).await?;
        if head.is_directory() {
            return Err(FsError::IsDirectory(key.to_string()));
        }
        Ok(head)
    }
}
