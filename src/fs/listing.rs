//! Lazy, filtered directory listings.
//!
//! A listing is pulled page by page from the store and handed out one
//! located status at a time. Entries rejected by the caller's filter are
//! skipped before they are ever buffered, and the page cursor is released as
//! soon as it runs dry.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    errors::{FsError, FsResult},
    fs::status,
    models::{LocatedStatus, ObjectMetadata},
    services::client::ObjectStoreClient,
};

/// Predicate over the fully-qualified path of each listed entry.
pub type PathFilter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// A forward-only source of listing entries.
#[async_trait]
pub trait EntrySource: Send {
    /// Next entry, or `None` once the source is exhausted.
    async fn next_entry(&mut self) -> FsResult<Option<ObjectMetadata>>;

    /// Give back whatever the source holds on the remote side.
    fn release(&mut self);
}

/// Entries of one remote directory, fetched a page at a time.
pub struct PagedListing {
    client: Arc<dyn ObjectStoreClient>,
    key: String,
    buffered: VecDeque<ObjectMetadata>,
    next_token: Option<String>,
    last_page: bool,
}

impl PagedListing {
    pub fn new(client: Arc<dyn ObjectStoreClient>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            buffered: VecDeque::new(),
            next_token: None,
            last_page: false,
        }
    }
}

#[async_trait]
impl EntrySource for PagedListing {
    async fn next_entry(&mut self) -> FsResult<Option<ObjectMetadata>> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Ok(Some(entry));
            }
            if self.last_page {
                return Ok(None);
            }

            let page = self
                .client
                .list_page(&self.key, self.next_token.as_deref())
                .await?;
            debug!(
                "Fetched listing page of {} entries for {}",
                page.entries.len(),
                self.key
            );
            self.last_page = page.next_token.is_none();
            self.next_token = page.next_token;
            self.buffered.extend(page.entries);
        }
    }

    fn release(&mut self) {
        self.buffered.clear();
        self.next_token = None;
        self.last_page = true;
    }
}

/// A source that yields exactly one entry.
pub struct SingleEntry(Option<ObjectMetadata>);

impl SingleEntry {
    pub fn new(entry: ObjectMetadata) -> Self {
        Self(Some(entry))
    }
}

#[async_trait]
impl EntrySource for SingleEntry {
    async fn next_entry(&mut self) -> FsResult<Option<ObjectMetadata>> {
        Ok(self.0.take())
    }

    fn release(&mut self) {
        self.0 = None;
    }
}

/// Single-pass iterator of located statuses with one entry of lookahead.
///
/// Not synchronized: use from one task at a time.
pub struct LocatedStatusLister {
    path: String,
    source: Option<Box<dyn EntrySource>>,
    filter: Option<PathFilter>,
    lookahead: Option<ObjectMetadata>,
    auto_close: bool,
}

impl LocatedStatusLister {
    /// Start listing `path` and buffer the first accepted entry.
    pub async fn start(
        path: impl Into<String>,
        source: Box<dyn EntrySource>,
        filter: Option<PathFilter>,
        auto_close: bool,
    ) -> FsResult<Self> {
        let mut lister = Self {
            path: path.into(),
            source: Some(source),
            filter,
            lookahead: None,
            auto_close,
        };
        lister.refill().await?;
        Ok(lister)
    }

    pub fn has_next(&self) -> bool {
        self.lookahead.is_some()
    }

    /// Hand out the buffered entry and pull the next accepted one.
    pub async fn next(&mut self) -> FsResult<LocatedStatus> {
        let entry = self
            .lookahead
            .take()
            .ok_or_else(|| FsError::NoSuchElement(self.path.clone()))?;
        self.refill().await?;

        let status = status::project_own(&entry);
        Ok(LocatedStatus::locate(status))
    }

    /// Drain the remaining entries.
    pub async fn collect_remaining(&mut self) -> FsResult<Vec<LocatedStatus>> {
        let mut out = Vec::new();
        while self.has_next() {
            out.push(self.next().await?);
        }
        Ok(out)
    }

    /// Release the underlying cursor if it is still held.
    pub fn close(&mut self) {
        self.lookahead = None;
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            debug!("Released listing cursor for {}", self.path);
        }
    }

    async fn refill(&mut self) -> FsResult<()> {
        loop {
            let Some(source) = self.source.as_mut() else {
                self.lookahead = None;
                return Ok(());
            };

            match source.next_entry().await? {
                Some(entry) => {
                    let accepted = self
                        .filter
                        .as_ref()
                        .is_none_or(|filter| filter(entry.path.as_str()));
                    if accepted {
                        self.lookahead = Some(entry);
                        return Ok(());
                    }
                }
                None => {
                    self.lookahead = None;
                    if self.auto_close {
                        self.release();
                    }
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for LocatedStatusLister {
    fn drop(&mut self) {
        self.release();
    }
}
