//! src/services/local_store.rs
//!
//! LocalObjectStore: the object-store client contract backed by SQLite for
//! metadata and local disk for payloads. Payloads live beneath
//! `base_path/{shard}/{shard}/{id}`, keyed by the row id so that moves only
//! touch metadata. Jobs run on this machine through `sh`.

use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    pin::Pin,
    process::Stdio,
    sync::Arc,
    task::{Context, Poll, ready},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{FutureExt, future::BoxFuture};
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWrite},
    process::{ChildStdin, Command},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    errors::{FsError, FsResult},
    fs::path,
    models::{Md5Digest, ObjectKind, ObjectMetadata},
    services::client::{
        ByteChannel, ByteSink, JobHandle, JobSpec, ListPage, ObjectStoreClient, PutOptions,
    },
};

/// Schema applied by [`LocalObjectStore::migrate`].
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Content type recorded for directories.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-json-stream; type=directory";

/// Largest listing page the store hands out.
pub const MAX_PAGE_SIZE: usize = 1000;

const STAGING_DIR: &str = ".staging";

const SELECT_OBJECT: &str = "SELECT id, path, kind, size, md5, content_type, durability, \
                             last_modified FROM objects";

#[derive(Debug, FromRow)]
struct ObjectRow {
    id: Uuid,
    path: String,
    kind: String,
    size: Option<i64>,
    md5: Option<String>,
    content_type: Option<String>,
    durability: Option<i64>,
    last_modified: DateTime<Utc>,
}

impl ObjectRow {
    fn is_directory(&self) -> bool {
        self.kind == ObjectKind::Directory.as_str()
    }

    fn into_metadata(self) -> ObjectMetadata {
        let content_md5 = self.md5.as_deref().and_then(|hex| {
            Md5Digest::from_hex(hex)
                .inspect_err(|err| warn!("Ignoring stored md5 of {}: {}", self.path, err))
                .ok()
        });

        ObjectMetadata {
            kind: ObjectKind::parse(&self.kind),
            size: self.size.and_then(|size| u64::try_from(size).ok()),
            durability: self.durability.and_then(|d| u16::try_from(d).ok()),
            last_modified: Some(
                self.last_modified
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            content_type: self.content_type,
            content_md5,
            path: self.path,
        }
    }
}

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    page_size: usize,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Entries per listing page, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Create the metadata schema if it does not exist yet.
    pub async fn migrate(&self) -> FsResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Two-level shard identifiers for a payload, from the MD5 of its id.
    fn object_shards(id: &Uuid) -> (String, String) {
        let digest = md5::compute(id.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn payload_path(&self, id: &Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    async fn find_row(&self, key: &str) -> FsResult<Option<ObjectRow>> {
        let row = sqlx::query_as::<_, ObjectRow>(&format!("{} WHERE path = ?", SELECT_OBJECT))
            .bind(key)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    async fn fetch_row(&self, key: &str) -> FsResult<ObjectRow> {
        self.find_row(key)
            .await?
            .ok_or_else(|| FsError::not_found(key))
    }

    /// The parent of `key` must be the root or an existing directory.
    async fn ensure_parent_directory(&self, key: &str) -> FsResult<()> {
        let parent = path::parent(key).ok_or_else(|| FsError::InvalidPath(key.to_string()))?;
        if path::is_root(parent) {
            return Ok(());
        }

        match self.find_row(parent).await? {
            Some(row) if row.is_directory() => Ok(()),
            Some(_) => Err(FsError::InvalidPath(format!(
                "{} is not a directory",
                parent
            ))),
            None => Err(FsError::not_found(parent)),
        }
    }

    async fn create_directory_row(&self, key: &str) -> FsResult<()> {
        match self.find_row(key).await? {
            Some(row) if row.is_directory() => return Ok(()),
            Some(_) => return Err(FsError::AlreadyExists(key.to_string())),
            None => {}
        }

        sqlx::query(
            "INSERT INTO objects (id, path, parent, name, kind, content_type, last_modified)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(path) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(path::parent(key))
        .bind(path::file_name(key))
        .bind(ObjectKind::Directory.as_str())
        .bind(DIRECTORY_CONTENT_TYPE)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!("created directory {}", key);
        Ok(())
    }

    /// Move a staged upload into place and record its metadata.
    async fn commit(
        self,
        key: String,
        options: PutOptions,
        staged: PathBuf,
        file: File,
        digest: md5::Digest,
        size: u64,
    ) -> FsResult<()> {
        file.sync_all().await?;
        drop(file);

        let (id, replaced) = match self.find_row(&key).await? {
            Some(row) if row.is_directory() => return Err(FsError::IsDirectory(key)),
            Some(row) => (row.id, true),
            None => (Uuid::new_v4(), false),
        };

        let file_path = self.payload_path(&id);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            FsError::Io(io::Error::other("payload path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;

        if let Err(err) = fs::rename(&staged, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&staged, &file_path).await?;
            } else {
                return Err(FsError::Io(err));
            }
        }

        let upsert = sqlx::query(
            r#"
            INSERT INTO objects (
                id, path, parent, name, kind, size, md5,
                content_type, durability, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                md5 = excluded.md5,
                content_type = excluded.content_type,
                durability = excluded.durability,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(id)
        .bind(&key)
        .bind(path::parent(&key))
        .bind(path::file_name(&key))
        .bind(ObjectKind::Object.as_str())
        .bind(size as i64)
        .bind(format!("{:x}", digest))
        .bind(options.content_type)
        .bind(options.durability.map(i64::from))
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match upsert {
            Ok(_) => {
                debug!("stored {} ({} bytes) at {}", key, size, file_path.display());
                Ok(())
            }
            Err(err) => {
                if !replaced {
                    let _ = fs::remove_file(&file_path).await;
                }
                Err(FsError::Sqlx(err))
            }
        }
    }

    /// Remove a payload file and any shard directories it leaves empty.
    async fn remove_payload(&self, id: &Uuid) -> FsResult<()> {
        let file_path = self.payload_path(id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(FsError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    /// Recursively remove empty directories up to `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn encode_token(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name)
}

fn decode_token(token: &str) -> FsResult<String> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| FsError::InvalidPath(format!("malformed listing token [{}]", token)))
}

/// Prefix of every key beneath `key` and its length in characters. Matched
/// with `substr` rather than LIKE so keys may hold `%` and `_`.
fn subtree_prefix(key: &str) -> (String, i64) {
    let prefix = format!("{}/", key);
    let len = prefix.chars().count() as i64;
    (prefix, len)
}

#[async_trait]
impl ObjectStoreClient for LocalObjectStore {
    async fn head(&self, key: &str) -> FsResult<ObjectMetadata> {
        if path::is_root(key) {
            return Ok(ObjectMetadata::directory("/"));
        }
        Ok(self.fetch_row(key).await?.into_metadata())
    }

    async fn ranged_read(&self, key: &str, start: u64) -> FsResult<ByteChannel> {
        let row = self.fetch_row(key).await?;
        if row.is_directory() {
            return Err(FsError::IsDirectory(key.to_string()));
        }

        let size = row.size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0);
        if start >= size {
            return Ok(Box::new(tokio::io::empty()));
        }

        let file_path = self.payload_path(&row.id);
        let mut file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                FsError::not_found(key)
            } else {
                FsError::Io(err)
            }
        })?;
        file.seek(SeekFrom::Start(start)).await?;
        Ok(Box::new(file))
    }

    async fn list_page(&self, key: &str, token: Option<&str>) -> FsResult<ListPage> {
        if !path::is_root(key) && !self.fetch_row(key).await?.is_directory() {
            return Err(FsError::InvalidPath(format!("{} is not a directory", key)));
        }

        let parent = if path::is_root(key) { "/" } else { key };
        let fetch_limit = self.page_size + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_OBJECT);
        builder.push(" WHERE parent = ");
        builder.push_bind(parent);
        if let Some(token) = token {
            builder.push(" AND name > ");
            builder.push_bind(decode_token(token)?);
        }
        builder.push(" ORDER BY name ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_token = rows.last().map(|row| encode_token(path::file_name(&row.path)));
        }

        Ok(ListPage {
            entries: rows.into_iter().map(ObjectRow::into_metadata).collect(),
            next_token,
        })
    }

    async fn submit_job(&self, job: JobSpec) -> FsResult<Box<dyn JobHandle>> {
        let row = self.fetch_row(&job.input).await?;
        if row.is_directory() {
            return Err(FsError::IsDirectory(job.input));
        }

        let id = Uuid::new_v4().to_string();
        info!(
            "Submitted {:?} job {} ({}) over {}",
            job.phase.kind, id, job.name, job.input
        );

        Ok(Box::new(LocalJob {
            id,
            exec: job.phase.exec,
            input: self.payload_path(&row.id),
        }))
    }

    async fn put(&self, key: &str, options: PutOptions) -> FsResult<ByteSink> {
        if path::is_root(key) {
            return Err(FsError::IsDirectory(key.to_string()));
        }
        if let Some(row) = self.find_row(key).await?
            && row.is_directory()
        {
            return Err(FsError::IsDirectory(key.to_string()));
        }
        self.ensure_parent_directory(key).await?;

        let staging = self.base_path.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        let staged = staging.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&staged).await?;
        debug!("staging upload of {} at {}", key, staged.display());

        Ok(Box::new(StagedObjectWriter {
            store: self.clone(),
            key: key.to_string(),
            options,
            staged,
            file: Some(file),
            digest: md5::Context::new(),
            size: 0,
            commit: None,
            committed: false,
        }))
    }

    async fn put_directory(&self, key: &str, recursive: bool) -> FsResult<()> {
        if path::is_root(key) {
            return Ok(());
        }

        let mut chain = vec![key];
        if recursive {
            let mut current = key;
            while let Some(parent) = path::parent(current) {
                if path::is_root(parent) {
                    break;
                }
                chain.push(parent);
                current = parent;
            }
        } else {
            self.ensure_parent_directory(key).await?;
        }

        for dir in chain.into_iter().rev() {
            self.create_directory_row(dir).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> FsResult<()> {
        if path::is_root(key) {
            return Err(FsError::InvalidPath(key.to_string()));
        }
        let row = self.fetch_row(key).await?;

        if row.is_directory() {
            let (children,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM objects WHERE parent = ?")
                    .bind(key)
                    .fetch_one(&*self.db)
                    .await?;
            if children > 0 {
                return Err(FsError::DirectoryNotEmpty(key.to_string()));
            }
        }

        sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(row.id)
            .execute(&*self.db)
            .await?;

        if !row.is_directory() {
            self.remove_payload(&row.id).await?;
        }
        debug!("deleted {}", key);
        Ok(())
    }

    async fn delete_recursive(&self, key: &str) -> FsResult<()> {
        if path::is_root(key) {
            return Err(FsError::InvalidPath(key.to_string()));
        }
        self.fetch_row(key).await?;

        let (prefix, prefix_len) = subtree_prefix(key);
        let doomed: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, kind FROM objects WHERE path = ? OR substr(path, 1, ?) = ?",
        )
        .bind(key)
        .bind(prefix_len)
        .bind(&prefix)
        .fetch_all(&*self.db)
        .await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM objects WHERE path = ? OR substr(path, 1, ?) = ?")
            .bind(key)
            .bind(prefix_len)
            .bind(&prefix)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for (id, kind) in &doomed {
            if kind == ObjectKind::Object.as_str() {
                self.remove_payload(id).await?;
            }
        }
        debug!("deleted {} entries under {}", doomed.len(), key);
        Ok(())
    }

    async fn move_object(&self, from: &str, to: &str) -> FsResult<()> {
        if path::is_root(from) || path::is_root(to) {
            return Err(FsError::InvalidPath(format!("cannot move {} to {}", from, to)));
        }
        if from == to {
            return Ok(());
        }

        let row = self.fetch_row(from).await?;
        let (prefix, prefix_len) = subtree_prefix(from);
        if to.starts_with(&prefix) {
            return Err(FsError::InvalidPath(format!(
                "cannot move {} beneath itself",
                from
            )));
        }
        if self.find_row(to).await?.is_some() {
            return Err(FsError::AlreadyExists(to.to_string()));
        }
        self.ensure_parent_directory(to).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("UPDATE objects SET path = ?, parent = ?, name = ? WHERE id = ?")
            .bind(to)
            .bind(path::parent(to))
            .bind(path::file_name(to))
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        if row.is_directory() {
            let tail_start = from.chars().count() as i64 + 1;
            sqlx::query(
                "UPDATE objects
                 SET path = ? || substr(path, ?), parent = ? || substr(parent, ?)
                 WHERE substr(path, 1, ?) = ?",
            )
            .bind(to)
            .bind(tail_start)
            .bind(to)
            .bind(tail_start)
            .bind(prefix_len)
            .bind(&prefix)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("moved {} to {}", from, to);
        Ok(())
    }

    async fn close(&self) -> FsResult<()> {
        self.db.close().await;
        Ok(())
    }
}

/// Upload sink: bytes go to a staging file while being hashed; shutdown
/// moves the file into place and records the metadata.
struct StagedObjectWriter {
    store: LocalObjectStore,
    key: String,
    options: PutOptions,
    staged: PathBuf,
    file: Option<File>,
    digest: md5::Context,
    size: u64,
    commit: Option<BoxFuture<'static, FsResult<()>>>,
    committed: bool,
}

impl StagedObjectWriter {
    fn closed(&self) -> io::Error {
        FsError::Closed(format!("upload of {}", self.key)).into()
    }
}

impl AsyncWrite for StagedObjectWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(file) = this.file.as_mut() else {
            return Poll::Ready(Err(this.closed()));
        };

        let written = ready!(Pin::new(file).poll_write(cx, buf))?;
        this.digest.consume(&buf[..written]);
        this.size += written as u64;
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Ok(()));
        }

        if this.commit.is_none() {
            let Some(file) = this.file.as_mut() else {
                return Poll::Ready(Err(this.closed()));
            };
            ready!(Pin::new(file).poll_shutdown(cx))?;

            let Some(file) = this.file.take() else {
                return Poll::Ready(Err(this.closed()));
            };
            let digest = std::mem::replace(&mut this.digest, md5::Context::new()).compute();
            let commit = this.store.clone().commit(
                this.key.clone(),
                this.options.clone(),
                this.staged.clone(),
                file,
                digest,
                this.size,
            );
            this.commit = Some(commit.boxed());
        }

        let Some(commit) = this.commit.as_mut() else {
            return Poll::Ready(Err(this.closed()));
        };
        let result = ready!(commit.poll_unpin(cx));
        this.commit = None;
        result?;
        this.committed = true;
        Poll::Ready(Ok(()))
    }
}

impl Drop for StagedObjectWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.staged) {
            Ok(_) => debug!("discarded unfinished upload of {}", self.key),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "failed to remove staged upload {}: {}",
                self.staged.display(),
                err
            ),
        }
    }
}

/// A job executed locally: the phase command runs under `sh -c` with the
/// input object on stdin.
struct LocalJob {
    id: String,
    exec: String,
    input: PathBuf,
}

#[async_trait]
impl JobHandle for LocalJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn wait_until_done(&mut self) -> FsResult<Vec<String>> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.exec)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| FsError::JobFailed {
            job: self.id.clone(),
            message: "job stdin unavailable".into(),
        })?;
        let feed = feed_input(self.input.clone(), stdin);
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(err) = fed {
            warn!("Feeding input to job {} failed: {}", self.id, err);
        }

        if !output.status.success() {
            return Err(FsError::JobFailed {
                job: self.id.clone(),
                message: format!(
                    "`{}` exited with {}: {}",
                    self.exec,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let lines = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect::<Vec<_>>();
        debug!("job {} finished with {} output lines", self.id, lines.len());
        Ok(lines)
    }
}

async fn feed_input(input: PathBuf, mut stdin: ChildStdin) -> io::Result<()> {
    let mut source = File::open(&input).await?;
    match tokio::io::copy(&mut source, &mut stdin).await {
        Ok(_) => Ok(()),
        // the command may stop reading early, e.g. `head -c`
        Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err),
    }
}
