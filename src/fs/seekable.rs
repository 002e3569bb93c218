//! Seekable reads over a remote object.
//!
//! The store only offers forward byte streams starting at an offset, so a
//! seek either skips ahead on the current stream or drops it and issues a
//! fresh ranged read. Skipping is cheaper for short hops; anything backwards,
//! anything from the very start, and anything farther than
//! [`REPOSITION_THRESHOLD`] re-opens.

use std::sync::Arc;

use tokio::{
    io::{self, AsyncReadExt},
    sync::Mutex,
};
use tracing::{debug, warn};

use crate::{
    errors::{FsError, FsResult},
    services::client::{ByteChannel, ObjectStoreClient},
};

/// Forward distance at which re-opening beats skipping.
pub const REPOSITION_THRESHOLD: u64 = 1_048_576;

/// Random-access reader over one remote object.
///
/// All operations lock the reader, so concurrent callers sharing one
/// instance are serialized. Separate readers are independent.
pub struct SeekableObjectReader {
    key: String,
    cursor: Mutex<SeekCursor>,
}

/// The live channel and the offset it is positioned at.
struct SeekCursor {
    client: Arc<dyn ObjectStoreClient>,
    key: String,
    channel: Option<ByteChannel>,
    position: u64,
    closed: bool,
}

impl SeekableObjectReader {
    /// Open `key` for reading from offset zero.
    pub async fn open(client: Arc<dyn ObjectStoreClient>, key: impl Into<String>) -> FsResult<Self> {
        let key = key.into();
        let channel = client.ranged_read(&key, 0).await?;
        debug!("Opened seekable reader for {}", key);

        Ok(Self {
            cursor: Mutex::new(SeekCursor {
                client,
                key: key.clone(),
                channel: Some(channel),
                position: 0,
                closed: false,
            }),
            key,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn position(&self) -> FsResult<u64> {
        let cursor = self.cursor.lock().await;
        cursor.ensure_open()?;
        Ok(cursor.position)
    }

    /// Move to `target`. Seeking past the end is allowed; reads there return 0.
    pub async fn seek(&self, target: u64) -> FsResult<()> {
        let mut cursor = self.cursor.lock().await;
        cursor.seek(target).await
    }

    /// Read into `buf` from the current position. Returns 0 at end of object.
    pub async fn read(&self, buf: &mut [u8]) -> FsResult<usize> {
        let mut cursor = self.cursor.lock().await;
        cursor.read(buf).await
    }

    /// Read at `position` without moving the reader's position.
    ///
    /// The position is restored even when the read fails.
    pub async fn read_at(&self, position: u64, buf: &mut [u8]) -> FsResult<usize> {
        let mut cursor = self.cursor.lock().await;
        cursor.ensure_open()?;
        let saved = cursor.position;

        let result = match cursor.seek(position).await {
            Ok(()) => cursor.read(buf).await,
            Err(err) => Err(err),
        };
        let restored = cursor.seek(saved).await;

        match (result, restored) {
            (Ok(read), Ok(())) => Ok(read),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore_err)) => {
                warn!(
                    "Failed to restore position {} of {}: {}",
                    saved, cursor.key, restore_err
                );
                Err(err)
            }
        }
    }

    /// Fill `buf` entirely from `position`, failing with `UnexpectedEof` if
    /// the object ends first. The reader's position is left untouched.
    pub async fn read_fully_at(&self, position: u64, buf: &mut [u8]) -> FsResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self
                .read_at(position + filled as u64, &mut buf[filled..])
                .await?;
            if read == 0 {
                return Err(FsError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} ended after {} of {} bytes",
                        self.key,
                        filled,
                        buf.len()
                    ),
                )));
            }
            filled += read;
        }
        Ok(())
    }

    /// Read everything from the current position to the end of the object.
    pub async fn read_to_end(&self, out: &mut Vec<u8>) -> FsResult<usize> {
        let mut cursor = self.cursor.lock().await;
        let channel = cursor.channel().await?;
        let read = channel.read_to_end(out).await?;
        cursor.position += read as u64;
        Ok(read)
    }

    /// Skip up to `n` bytes on the current stream; returns how many were
    /// skipped.
    pub async fn skip(&self, n: u64) -> FsResult<u64> {
        let mut cursor = self.cursor.lock().await;
        cursor.skip_forward(n).await
    }

    /// Release the channel. Closing an already-closed reader does nothing.
    pub async fn close(&self) -> FsResult<()> {
        let mut cursor = self.cursor.lock().await;
        if cursor.closed {
            debug!("Reader for {} already closed", cursor.key);
            return Ok(());
        }

        cursor.closed = true;
        if let Some(channel) = cursor.channel.take() {
            drop(channel);
            debug!("Released channel for {}", cursor.key);
        }
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        self.cursor.lock().await.closed
    }
}

impl SeekCursor {
    fn ensure_open(&self) -> FsResult<()> {
        if self.closed {
            return Err(FsError::Closed(format!("reader for {}", self.key)));
        }
        Ok(())
    }

    /// The live channel, opening one at the current position if the last
    /// reposition failed to produce one.
    async fn channel(&mut self) -> FsResult<&mut ByteChannel> {
        self.ensure_open()?;
        if self.channel.is_none() {
            let channel = self.client.ranged_read(&self.key, self.position).await?;
            self.channel = Some(channel);
        }
        self.channel
            .as_mut()
            .ok_or_else(|| FsError::Closed(format!("channel for {}", self.key)))
    }

    async fn seek(&mut self, target: u64) -> FsResult<()> {
        self.ensure_open()?;
        let current = self.position;

        if target == current {
            return Ok(());
        }

        // Nothing read yet, or going backwards: skipping cannot help.
        if current < 1 || target < current || self.channel.is_none() {
            return self.reposition(target).await;
        }

        let ahead = target - current;
        if ahead >= REPOSITION_THRESHOLD {
            return self.reposition(target).await;
        }

        let skipped = self.skip_forward(ahead).await?;
        if skipped < ahead {
            // Past the end: the drained channel keeps reading nothing, and the
            // position lands on the target as a reposition past the end would.
            debug!(
                "Seek to {} ran past the end of {} at {}",
                target, self.key, self.position
            );
            self.position = target;
        }
        Ok(())
    }

    /// Drop the current channel and open a new ranged read at `target`.
    ///
    /// The position moves to `target` even when opening fails; the next read
    /// then opens lazily from there.
    async fn reposition(&mut self, target: u64) -> FsResult<()> {
        debug!(
            "Repositioning {} from {} to {} with a new ranged read",
            self.key, self.position, target
        );

        if let Some(stale) = self.channel.take() {
            drop(stale);
        }
        self.position = target;

        match self.client.ranged_read(&self.key, target).await {
            Ok(channel) => {
                self.channel = Some(channel);
                Ok(())
            }
            Err(err) => {
                warn!("Unable to open {} at offset {}: {}", self.key, target, err);
                Err(err)
            }
        }
    }

    async fn skip_forward(&mut self, n: u64) -> FsResult<u64> {
        let channel = self.channel().await?;
        let mut limited = channel.take(n);
        let skipped = io::copy(&mut limited, &mut io::sink()).await?;
        self.position += skipped;
        Ok(skipped)
    }

    async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        let channel = self.channel().await?;
        let read = channel.read(buf).await?;
        self.position += read as u64;
        Ok(read)
    }
}
