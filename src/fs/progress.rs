//! Liveness notifications for long uploads.
//!
//! Callers that watch for stalled writers get a progress callback while
//! bytes keep flowing. The callback fires once when the relay is built and
//! then at most once per [`PROGRESS_INTERVAL`] across writes, flushes and
//! shutdown.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{io::AsyncWrite, time::Instant};
use tracing::warn;

/// Minimum time between two progress callbacks.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Liveness callback. Failures are logged and never reach the writer.
pub type ProgressCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Write-through wrapper that reports progress on a fixed interval.
pub struct ProgressRelay<W> {
    inner: W,
    progress: ProgressCallback,
    interval: Duration,
    last_update: Option<Instant>,
}

impl<W> ProgressRelay<W> {
    pub fn new(inner: W, progress: ProgressCallback) -> Self {
        Self::with_interval(inner, progress, PROGRESS_INTERVAL)
    }

    pub fn with_interval(inner: W, progress: ProgressCallback, interval: Duration) -> Self {
        let mut relay = Self {
            inner,
            progress,
            interval,
            last_update: None,
        };
        relay.update_progress();
        relay
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn update_progress(&mut self) {
        let now = Instant::now();
        let due = self
            .last_update
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if !due {
            return;
        }

        self.last_update = Some(now);
        if let Err(err) = (self.progress)() {
            warn!("Progress notification failed: {:#}", err);
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressRelay<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.update_progress();
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.update_progress();
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.update_progress();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
