//! In-memory store used by unit tests. Counts the remote calls the core
//! components are supposed to economize on.

use std::{
    collections::BTreeMap,
    io,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{
    errors::{FsError, FsResult},
    fs::path,
    models::ObjectMetadata,
    services::client::{
        ByteChannel, ByteSink, JobHandle, JobSpec, ListPage, ObjectStoreClient, PutOptions,
    },
};

type Objects = Arc<Mutex<BTreeMap<String, (ObjectMetadata, Vec<u8>)>>>;

pub struct MemoryClient {
    objects: Objects,
    page_size: usize,
    opens: AtomicUsize,
    released: Arc<AtomicUsize>,
    list_calls: AtomicUsize,
    jobs: AtomicUsize,
    last_job_exec: Mutex<Option<String>>,
    job_output: Mutex<Option<Vec<String>>>,
    fail_reads_at: Mutex<Option<u64>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            page_size,
            opens: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            list_calls: AtomicUsize::new(0),
            jobs: AtomicUsize::new(0),
            last_job_exec: Mutex::new(None),
            job_output: Mutex::new(None),
            fail_reads_at: Mutex::new(None),
        }
    }

    pub fn insert_object(&self, key: &str, data: Vec<u8>) {
        let metadata = ObjectMetadata::object(key, data.len() as u64);
        self.insert_metadata(metadata, data);
    }

    pub fn insert_directory(&self, key: &str) {
        self.insert_metadata(ObjectMetadata::directory(key), Vec::new());
    }

    pub fn insert_metadata(&self, metadata: ObjectMetadata, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(metadata.path.clone(), (metadata, data));
    }

    pub fn data(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(_, data)| data.clone())
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    pub fn last_job_exec(&self) -> Option<String> {
        self.last_job_exec.lock().unwrap().clone()
    }

    /// Replace the output of subsequent jobs.
    pub fn set_job_output(&self, output: Option<Vec<String>>) {
        *self.job_output.lock().unwrap() = output;
    }

    /// Make ranged reads starting at `offset` fail.
    pub fn fail_reads_at(&self, offset: Option<u64>) {
        *self.fail_reads_at.lock().unwrap() = offset;
    }

    fn children(&self, key: &str) -> Vec<ObjectMetadata> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .filter(|(meta, _)| path::parent(&meta.path) == Some(key))
            .map(|(meta, _)| meta.clone())
            .collect()
    }
}

struct TrackedChannel {
    inner: io::Cursor<Vec<u8>>,
    released: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for TrackedChannel {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemorySink {
    key: String,
    options: PutOptions,
    buf: Vec<u8>,
    objects: Objects,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let data = std::mem::take(&mut self.buf);
        let mut metadata = ObjectMetadata::object(self.key.clone(), data.len() as u64);
        metadata.durability = self.options.durability;
        metadata.content_type = self.options.content_type.clone();
        self.objects
            .lock()
            .unwrap()
            .insert(self.key.clone(), (metadata, data));
        Poll::Ready(Ok(()))
    }
}

struct MemoryJob {
    id: String,
    output: Vec<String>,
}

#[async_trait]
impl JobHandle for MemoryJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait_until_done(&mut self) -> FsResult<Vec<String>> {
        Ok(std::mem::take(&mut self.output))
    }
}

/// Pull `N` out of `head -c N | ...`.
fn prefix_length(exec: &str) -> Option<usize> {
    let mut words = exec.split_whitespace();
    while let Some(word) = words.next() {
        if word == "-c" {
            return words.next()?.parse().ok();
        }
    }
    None
}

#[async_trait]
impl ObjectStoreClient for MemoryClient {
    async fn head(&self, key: &str) -> FsResult<ObjectMetadata> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| FsError::not_found(key))
    }

    async fn ranged_read(&self, key: &str, start: u64) -> FsResult<ByteChannel> {
        if *self.fail_reads_at.lock().unwrap() == Some(start) {
            return Err(FsError::Io(io::Error::other("injected read failure")));
        }
        let data = self.data(key).ok_or_else(|| FsError::not_found(key))?;
        self.opens.fetch_add(1, Ordering::SeqCst);

        let start = (start as usize).min(data.len());
        Ok(Box::new(TrackedChannel {
            inner: io::Cursor::new(data[start..].to_vec()),
            released: self.released.clone(),
        }))
    }

    async fn list_page(&self, key: &str, token: Option<&str>) -> FsResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let children = self.children(key);
        let offset: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + self.page_size).min(children.len());

        Ok(ListPage {
            entries: children[offset.min(end)..end].to_vec(),
            next_token: (end < children.len()).then(|| end.to_string()),
        })
    }

    async fn submit_job(&self, job: JobSpec) -> FsResult<Box<dyn JobHandle>> {
        let number = self.jobs.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_job_exec.lock().unwrap() = Some(job.phase.exec.clone());

        let output = match self.job_output.lock().unwrap().clone() {
            Some(output) => output,
            None => {
                let data = self
                    .data(&job.input)
                    .ok_or_else(|| FsError::not_found(&job.input))?;
                let length = prefix_length(&job.phase.exec)
                    .unwrap_or(data.len())
                    .min(data.len());
                vec![format!("{:x}\n", md5::compute(&data[..length]))]
            }
        };

        Ok(Box::new(MemoryJob {
            id: format!("job-{number}"),
            output,
        }))
    }

    async fn put(&self, key: &str, options: PutOptions) -> FsResult<ByteSink> {
        Ok(Box::new(MemorySink {
            key: key.to_string(),
            options,
            buf: Vec::new(),
            objects: self.objects.clone(),
        }))
    }

    async fn put_directory(&self, key: &str, _recursive: bool) -> FsResult<()> {
        self.insert_directory(key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> FsResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| FsError::not_found(key))
    }

    async fn delete_recursive(&self, key: &str) -> FsResult<()> {
        let prefix = format!("{}/", key);
        self.objects
            .lock()
            .unwrap()
            .retain(|path, _| path != key && !path.starts_with(&prefix));
        Ok(())
    }

    async fn move_object(&self, from: &str, to: &str) -> FsResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let (mut meta, data) = objects.remove(from).ok_or_else(|| FsError::not_found(from))?;
        meta.path = to.to_string();
        objects.insert(to.to_string(), (meta, data));
        Ok(())
    }
}
