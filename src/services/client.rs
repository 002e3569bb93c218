//! Contract of the remote object-store client the filesystem sits on.
//!
//! Timeouts, retries, signing and transport all live below this trait;
//! nothing above it retries a failed call.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    errors::FsResult,
    models::ObjectMetadata,
};

/// Byte stream over a remote object starting at some offset.
pub type ByteChannel = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming upload; the object becomes visible once the sink is shut down.
pub type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;

/// One page of a directory listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectMetadata>,
    /// Token for the following page, `None` on the last page.
    pub next_token: Option<String>,
}

/// Headers attached to an upload.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub durability: Option<u16>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Map,
    Reduce,
}

/// A scripted step executed by the store against the job input.
#[derive(Debug, Clone)]
pub struct JobPhase {
    pub kind: PhaseKind,
    pub exec: String,
}

/// A single-input, single-phase remote job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub input: String,
    pub phase: JobPhase,
}

/// A submitted job.
#[async_trait]
pub trait JobHandle: Send {
    /// Store-assigned job identifier.
    fn id(&self) -> &str;

    /// Block until the job finishes and return its output lines.
    async fn wait_until_done(&mut self) -> FsResult<Vec<String>>;
}

/// Remote store operations consumed by the filesystem façade.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Metadata for `key`, or `FsError::NotFound`.
    async fn head(&self, key: &str) -> FsResult<ObjectMetadata>;

    async fn exists(&self, key: &str) -> FsResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Open a ranged read from `start` to the end of the object. Starting at
    /// or past the end yields an empty stream.
    async fn ranged_read(&self, key: &str, start: u64) -> FsResult<ByteChannel>;

    /// Fetch one page of the immediate children of directory `key`.
    async fn list_page(&self, key: &str, token: Option<&str>) -> FsResult<ListPage>;

    async fn submit_job(&self, job: JobSpec) -> FsResult<Box<dyn JobHandle>>;

    /// Start a streaming upload to `key`, replacing any existing object.
    async fn put(&self, key: &str, options: PutOptions) -> FsResult<ByteSink>;

    async fn put_bytes(&self, key: &str, data: Bytes, options: PutOptions) -> FsResult<()> {
        let mut sink = self.put(key, options).await?;
        sink.write_all(&data).await?;
        sink.shutdown().await?;
        Ok(())
    }

    /// Create directory `key`; with `recursive`, missing parents too.
    async fn put_directory(&self, key: &str, recursive: bool) -> FsResult<()>;

    /// Delete a single object or an empty directory.
    async fn delete(&self, key: &str) -> FsResult<()>;

    /// Delete `key` and everything beneath it.
    async fn delete_recursive(&self, key: &str) -> FsResult<()>;

    async fn move_object(&self, from: &str, to: &str) -> FsResult<()>;

    async fn close(&self) -> FsResult<()> {
        Ok(())
    }
}
