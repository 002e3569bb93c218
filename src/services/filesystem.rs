//! The filesystem façade: hierarchical paths in, store operations out.
//!
//! Every operation resolves its path against the home directory and the
//! working directory, calls the store client and projects the result through
//! the `fs` components. The root `/` is emulated: it is a directory whose
//! only entry is the home directory.

use std::{collections::HashMap, io, path::Path, sync::Arc};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Deserializer};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;

use crate::{
    errors::{FsError, FsResult},
    fs::{
        ChecksumStrategy, EntrySource, LocatedStatusLister, PagedListing, PathFilter,
        ProgressCallback, ProgressRelay, SeekableObjectReader, SingleEntry,
        checksum::REMOTE_CHECKSUM_THRESHOLD, path, status,
    },
    models::{FileStatus, Md5Digest, ObjectMetadata},
    services::client::{ByteSink, ObjectStoreClient, PutOptions},
};

/// Replication reported for paths that do not say otherwise.
pub const DEFAULT_REPLICATION: u16 = 2;

pub const ROOT_URI: &str = "manta:///";

/// Location of the storage usage report, relative to the home directory.
const USAGE_REPORT: &str = "reports/usage/storage/latest";

pub struct MantaFileSystem {
    client: Arc<dyn ObjectStoreClient>,
    home: String,
    working_dir: String,
    remote_checksum_threshold: u64,
}

impl MantaFileSystem {
    /// A filesystem rooted at the store behind `client`, starting in `home`.
    pub fn new(client: Arc<dyn ObjectStoreClient>, home: impl AsRef<str>) -> Self {
        let home = path::normalize(path::strip_scheme(home.as_ref()));
        Self {
            client,
            working_dir: home.clone(),
            home,
            remote_checksum_threshold: REMOTE_CHECKSUM_THRESHOLD,
        }
    }

    pub fn with_remote_checksum_threshold(mut self, threshold: u64) -> Self {
        self.remote_checksum_threshold = threshold;
        self
    }

    pub fn scheme(&self) -> &'static str {
        path::SCHEME
    }

    pub fn uri(&self) -> &'static str {
        ROOT_URI
    }

    pub fn home_directory(&self) -> &str {
        &self.home
    }

    pub fn working_directory(&self) -> &str {
        &self.working_dir
    }

    pub fn set_working_directory(&mut self, dir: &str) -> FsResult<()> {
        self.working_dir = self.resolve(dir)?;
        Ok(())
    }

    pub fn default_replication(&self) -> u16 {
        DEFAULT_REPLICATION
    }

    pub fn client(&self) -> &Arc<dyn ObjectStoreClient> {
        &self.client
    }

    /// Store key for a user-visible path.
    pub fn resolve(&self, user_path: &str) -> FsResult<String> {
        path::resolve(user_path, Some(&self.working_dir), &self.home)
    }

    pub async fn open(&self, user_path: &str) -> FsResult<SeekableObjectReader> {
        debug!("Opening '{}' for reading.", user_path);
        let key = self.resolve(user_path)?;
        if self.get_file_status(user_path).await?.is_directory {
            return Err(FsError::IsDirectory(key));
        }
        SeekableObjectReader::open(self.client.clone(), key).await
    }

    /// Start an upload to `user_path`. Missing parent directories are
    /// created; a positive `replication` is stored as the durability level.
    /// The object appears once the returned sink is shut down.
    pub async fn create(
        &self,
        user_path: &str,
        overwrite: bool,
        replication: u16,
        progress: Option<ProgressCallback>,
    ) -> FsResult<ByteSink> {
        let key = self.resolve(user_path)?;
        if !overwrite && self.client.exists(&key).await? {
            return Err(FsError::AlreadyExists(key));
        }

        debug!(
            "Creating new file with {} replicas at path: {}",
            replication, key
        );
        self.ensure_parent(&key).await?;

        let options = PutOptions {
            durability: (replication > 0).then_some(replication),
            content_type: None,
        };
        let sink = self.client.put(&key, options).await?;
        Ok(match progress {
            Some(progress) => Box::new(ProgressRelay::new(sink, progress)) as ByteSink,
            None => sink,
        })
    }

    pub async fn append(&self, user_path: &str) -> FsResult<ByteSink> {
        Err(FsError::Unsupported(format!("append to {}", user_path)))
    }

    /// Move `from` to `to`; moving onto an existing directory places the
    /// source inside it. Reports whether the destination exists afterwards.
    pub async fn rename(&self, from: &str, to: &str) -> FsResult<bool> {
        let source = self.resolve(from)?;
        let mut destination = self.resolve(to)?;

        if !self.client.exists(&source).await? {
            return Err(FsError::not_found(source));
        }
        if self.is_directory_key(&destination).await? {
            destination = path::join(&destination, path::file_name(&source));
        }

        debug!("Moving [{}] to [{}]", source, destination);
        self.ensure_parent(&destination).await?;
        self.client.move_object(&source, &destination).await?;
        self.client.exists(&destination).await
    }

    /// Delete `user_path`, recursing into directories only when asked.
    /// Returns `false` when there was nothing to delete.
    pub async fn delete(&self, user_path: &str, recursive: bool) -> FsResult<bool> {
        let key = self.resolve(user_path)?;

        let head = match self.client.head(&key).await {
            Ok(head) => head,
            Err(err) if err.is_not_found() => return Ok(false),
            Err(err) => return Err(err),
        };

        if recursive && head.is_directory() {
            debug!("Recursively deleting path: {}", key);
            self.client.delete_recursive(&key).await?;
        } else {
            debug!("Deleting path: {}", key);
            self.client.delete(&key).await?;
        }

        Ok(!self.client.exists(&key).await?)
    }

    pub async fn mkdirs(&self, user_path: &str) -> FsResult<bool> {
        let key = self.resolve(user_path)?;
        self.client.put_directory(&key, true).await?;
        self.client.exists(&key).await
    }

    pub async fn get_file_status(&self, user_path: &str) -> FsResult<FileStatus> {
        let key = self.resolve(user_path)?;
        debug!("Getting path status for: {}", key);

        if path::is_root(&key) {
            return Ok(FileStatus::synthetic_directory("/"));
        }

        let head = self.client.head(&key).await?;
        Ok(status::project(&head, key))
    }

    pub async fn exists(&self, user_path: &str) -> FsResult<bool> {
        let key = self.resolve(user_path)?;
        if path::is_root(&key) {
            return Ok(true);
        }
        self.client.exists(&key).await
    }

    /// `false` for missing paths.
    pub async fn is_directory(&self, user_path: &str) -> FsResult<bool> {
        let key = self.resolve(user_path)?;
        self.is_directory_key(&key).await
    }

    /// `false` for missing paths.
    pub async fn is_file(&self, user_path: &str) -> FsResult<bool> {
        let key = self.resolve(user_path)?;
        Ok(self.head_if_exists(&key).await?.is_some_and(|head| !head.is_directory()))
    }

    /// Statuses of the entries of a directory, or of the file itself.
    pub async fn list_status(&self, user_path: &str) -> FsResult<Vec<FileStatus>> {
        let key = self.resolve(user_path)?;
        debug!("List status for path: {}", key);

        if path::is_root(&key) {
            return Ok(vec![FileStatus::synthetic_directory(self.home.clone())]);
        }

        let head = self.client.head(&key).await?;
        if !head.is_directory() {
            return Ok(vec![status::project(&head, key)]);
        }

        let mut listing = PagedListing::new(self.client.clone(), key);
        let mut statuses = Vec::new();
        while let Some(entry) = listing.next_entry().await? {
            statuses.push(status::project_own(&entry));
        }
        Ok(statuses)
    }

    /// Lazily list the entries of a directory that pass `filter`.
    pub async fn list_located_status(
        &self,
        user_path: &str,
        filter: Option<PathFilter>,
    ) -> FsResult<LocatedStatusLister> {
        let key = self.resolve(user_path)?;
        debug!("List located status for path: {}", key);

        let source: Box<dyn EntrySource> = if path::is_root(&key) {
            Box::new(SingleEntry::new(ObjectMetadata::directory(self.home.clone())))
        } else {
            let head = self.client.head(&key).await?;
            if head.is_directory() {
                Box::new(PagedListing::new(self.client.clone(), key.clone()))
            } else {
                Box::new(SingleEntry::new(head))
            }
        };

        LocatedStatusLister::start(key, source, filter, true).await
    }

    /// Replace the object with empty content. Only truncation to zero is
    /// possible; the content type is carried over.
    pub async fn truncate(&self, user_path: &str, new_length: u64) -> FsResult<bool> {
        let key = self.resolve(user_path)?;
        let head = self.client.head(&key).await?;

        if new_length != 0 {
            return Err(FsError::Unsupported(
                "truncating to an arbitrary length higher than zero".into(),
            ));
        }
        if head.is_directory() {
            return Err(FsError::IsDirectory(key));
        }

        let options = PutOptions {
            durability: None,
            content_type: head.content_type,
        };
        self.client.put_bytes(&key, Bytes::new(), options).await?;
        Ok(true)
    }

    /// MD5 of the whole file.
    pub async fn get_file_checksum(&self, user_path: &str) -> FsResult<Md5Digest> {
        let key = self.resolve(user_path)?;
        self.checksums().whole_checksum(&key).await
    }

    /// MD5 of the first `length` bytes of the file.
    pub async fn get_file_checksum_range(
        &self,
        user_path: &str,
        length: u64,
    ) -> FsResult<Md5Digest> {
        let key = self.resolve(user_path)?;
        self.checksums().prefix_checksum(&key, length).await
    }

    /// Upload a local file or directory tree.
    ///
    /// Without `overwrite` an existing file at the destination is an error.
    /// An existing directory at the destination receives the source under
    /// its own name.
    pub async fn copy_from_local_file(
        &self,
        delete_source: bool,
        overwrite: bool,
        src: impl AsRef<Path>,
        dst: &str,
    ) -> FsResult<()> {
        let src = src.as_ref();
        let mut key = self.resolve(dst)?;
        if self.is_directory_key(&key).await?
            && let Some(name) = src.file_name()
        {
            key = path::join(&key, &name.to_string_lossy());
        }

        debug!("Copying local file [{}] to [{}]", src.display(), key);
        self.upload_tree(src, key, overwrite).await?;

        if delete_source {
            if fs::metadata(src).await?.is_dir() {
                fs::remove_dir_all(src).await?;
            } else {
                fs::remove_file(src).await?;
            }
        }
        Ok(())
    }

    /// Download a file or directory tree into `dst`, replacing local files.
    pub async fn copy_to_local_file(
        &self,
        delete_source: bool,
        src: &str,
        dst: impl AsRef<Path>,
    ) -> FsResult<()> {
        let key = self.resolve(src)?;
        let head = self.client.head(&key).await?;

        let mut dst = dst.as_ref().to_path_buf();
        if fs::metadata(&dst).await.is_ok_and(|meta| meta.is_dir()) {
            dst.push(head.name());
        }

        debug!("Copying [{}] to local [{}]", key, dst.display());
        self.download_tree(head.clone(), dst).await?;

        if delete_source {
            if head.is_directory() {
                self.client.delete_recursive(&key).await?;
            } else {
                self.client.delete(&key).await?;
            }
        }
        Ok(())
    }

    /// Total bytes stored by the account, from its latest usage report.
    pub async fn get_used(&self) -> FsResult<u64> {
        let report_key = path::join(&self.home, USAGE_REPORT);

        let mut channel = match self.client.ranged_read(&report_key, 0).await {
            Ok(channel) => channel,
            Err(err) if err.is_not_found() => {
                return Err(FsError::NotFound(format!(
                    "{}: usage report not found, it typically takes one day \
                     to generate for a new account",
                    report_key
                )));
            }
            Err(err) => return Err(err),
        };

        let mut json = String::new();
        channel.read_to_string(&mut json).await?;
        let report: UsageReport = serde_json::from_str(&json)?;
        report
            .storage
            .values()
            .try_fold(0u64, |total, usage| total.checked_add(usage.bytes))
            .ok_or_else(|| {
                FsError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: byte counts overflow a 64-bit total", report_key),
                ))
            })
    }

    pub async fn close(&self) -> FsResult<()> {
        self.client.close().await
    }

    fn checksums(&self) -> ChecksumStrategy {
        ChecksumStrategy::new(self.client.clone())
            .with_remote_threshold(self.remote_checksum_threshold)
    }

    async fn head_if_exists(&self, key: &str) -> FsResult<Option<ObjectMetadata>> {
        if path::is_root(key) {
            return Ok(Some(ObjectMetadata::directory("/")));
        }
        match self.client.head(key).await {
            Ok(head) => Ok(Some(head)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn is_directory_key(&self, key: &str) -> FsResult<bool> {
        Ok(self.head_if_exists(key).await?.is_some_and(|head| head.is_directory()))
    }

    async fn ensure_parent(&self, key: &str) -> FsResult<()> {
        if let Some(dir) = path::parent(key)
            && !path::is_root(dir)
            && !self.client.exists(dir).await?
        {
            debug!("Directory path to file didn't exist. Creating path: {}", dir);
            self.client.put_directory(dir, true).await?;
        }
        Ok(())
    }

    fn upload_tree<'a>(
        &'a self,
        src: &'a Path,
        key: String,
        overwrite: bool,
    ) -> BoxFuture<'a, FsResult<()>> {
        async move {
            if fs::metadata(src).await?.is_dir() {
                self.client.put_directory(&key, true).await?;
                let mut entries = fs::read_dir(src).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let child = path::join(&key, &entry.file_name().to_string_lossy());
                    let entry_path = entry.path();
                    self.upload_tree(&entry_path, child, overwrite).await?;
                }
                return Ok(());
            }

            match self.head_if_exists(&key).await? {
                Some(head) if head.is_directory() => return Err(FsError::IsDirectory(key)),
                Some(_) if !overwrite => return Err(FsError::AlreadyExists(key)),
                Some(_) => {}
                None => self.ensure_parent(&key).await?,
            }

            let mut file = fs::File::open(src).await?;
            let mut sink = self.client.put(&key, PutOptions::default()).await?;
            tokio::io::copy(&mut file, &mut sink).await?;
            sink.shutdown().await?;
            Ok(())
        }
        .boxed()
    }

    fn download_tree(
        &self,
        head: ObjectMetadata,
        dst: std::path::PathBuf,
    ) -> BoxFuture<'_, FsResult<()>> {
        async move {
            if head.is_directory() {
                fs::create_dir_all(&dst).await?;
                let mut listing = PagedListing::new(self.client.clone(), head.path.clone());
                while let Some(entry) = listing.next_entry().await? {
                    let child = dst.join(entry.name());
                    self.download_tree(entry, child).await?;
                }
                return Ok(());
            }

            let mut channel = self.client.ranged_read(&head.path, 0).await?;
            let mut file = fs::File::create(&dst).await?;
            tokio::io::copy(&mut channel, &mut file).await?;
            file.flush().await?;
            Ok(())
        }
        .boxed()
    }
}

#[derive(Deserialize)]
struct UsageReport {
    #[serde(default)]
    storage: HashMap<String, StorageUsage>,
}

#[derive(Deserialize)]
struct StorageUsage {
    #[serde(default, deserialize_with = "byte_count")]
    bytes: u64,
}

/// Reports write byte counts as strings; plain numbers are accepted too.
fn byte_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::local_store::{LocalObjectStore, tests::local_store};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const HOME: &str = "/alice";

    async fn filesystem() -> (TempDir, Arc<LocalObjectStore>, MantaFileSystem) {
        let (dir, store) = local_store(2).await;
        let store = Arc::new(store);
        let fs = MantaFileSystem::new(store.clone(), HOME);
        assert!(fs.mkdirs("~~/stor").await.unwrap());
        (dir, store, fs)
    }

    async fn write(fs: &MantaFileSystem, path: &str, data: &[u8]) {
        let mut sink = fs.create(path, true, 0, None).await.unwrap();
        sink.write_all(data).await.unwrap();
        sink.shutdown().await.unwrap();
    }

    async fn read(fs: &MantaFileSystem, path: &str) -> Vec<u8> {
        let reader = fs.open(path).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        reader.close().await.unwrap();
        out
    }

    #[tokio::test]
    async fn identity_of_the_filesystem() {
        let (_dir, _store, mut fs) = filesystem().await;
        assert_eq!(fs.scheme(), "manta");
        assert_eq!(fs.uri(), "manta:///");
        assert_eq!(fs.default_replication(), 2);
        assert_eq!(fs.home_directory(), "/alice");
        assert_eq!(fs.working_directory(), "/alice");

        fs.set_working_directory("stor").unwrap();
        assert_eq!(fs.working_directory(), "/alice/stor");
        assert_eq!(fs.resolve("bar.txt").unwrap(), "/alice/stor/bar.txt");
        assert_eq!(fs.resolve("~~/foo").unwrap(), "/alice/foo");
        assert_eq!(fs.resolve("manta:/absolute/x").unwrap(), "/absolute/x");
    }

    #[tokio::test]
    async fn created_files_read_back_with_their_status() {
        let (_dir, _store, fs) = filesystem().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let progress: ProgressCallback = Arc::new(move || -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut sink = fs
            .create("~~/stor/nested/deeper/data.bin", false, 3, Some(progress))
            .await
            .unwrap();
        sink.write_all(b"0123456789").await.unwrap();
        sink.shutdown().await.unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 1);

        let status = fs.get_file_status("~~/stor/nested/deeper/data.bin").await.unwrap();
        assert_eq!(status.path, "/alice/stor/nested/deeper/data.bin");
        assert_eq!(status.length, 10);
        assert_eq!(status.replication, 3);
        assert!(status.is_file());
        assert!(fs.is_directory("~~/stor/nested/deeper").await.unwrap());

        let reader = fs.open("~~/stor/nested/deeper/data.bin").await.unwrap();
        let mut buf = [0u8; 3];
        reader.read_fully_at(4, &mut buf).await.unwrap();
        assert_eq!(&buf, b"456");
        assert_eq!(reader.position().await.unwrap(), 0);

        assert!(matches!(
            fs.open("~~/stor/nested").await.err(),
            Some(FsError::IsDirectory(_))
        ));
        assert!(fs.open("~~/stor/missing").await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn create_without_overwrite_refuses_existing_files() {
        let (_dir, _store, fs) = filesystem().await;
        write(&fs, "~~/stor/a", b"first").await;

        assert!(matches!(
            fs.create("~~/stor/a", false, 0, None).await.err(),
            Some(FsError::AlreadyExists(path)) if path == "/alice/stor/a"
        ));
        write(&fs, "~~/stor/a", b"second").await;
        assert_eq!(read(&fs, "~~/stor/a").await, b"second");
        assert!(matches!(
            fs.append("~~/stor/a").await.err(),
            Some(FsError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn root_lists_only_the_home_directory() {
        let (_dir, _store, fs) = filesystem().await;

        let root = fs.get_file_status("/").await.unwrap();
        assert!(root.is_directory);
        assert!(fs.exists("/").await.unwrap());

        let listed = fs.list_status("/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "/alice");
        assert!(listed[0].is_directory);

        let home = fs.get_file_status("~~").await.unwrap();
        assert_eq!(listed[0].length, home.length);
        assert_eq!(listed[0].replication, home.replication);
        assert_eq!(root.length, home.length);

        let mut lister = fs.list_located_status("/", None).await.unwrap();
        let located = lister.collect_remaining().await.unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].status.path, "/alice");
        assert!(located[0].block_locations.is_empty());
    }

    #[tokio::test]
    async fn listings_span_pages_and_honor_filters() {
        let (_dir, _store, fs) = filesystem().await;
        for name in ["a.txt", "b.csv", "c.txt", "d.csv", "e.txt"] {
            write(&fs, &format!("~~/stor/{}", name), b"abc").await;
        }

        let all = fs.list_status("~~/stor").await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.iter().all(|status| status.length == 3));

        let filter: PathFilter = Box::new(|path: &str| path.ends_with(".txt"));
        let mut lister = fs
            .list_located_status("~~/stor", Some(filter))
            .await
            .unwrap();
        let mut names = Vec::new();
        while lister.has_next() {
            names.push(lister.next().await.unwrap().status.path);
        }
        assert_eq!(
            names,
            vec!["/alice/stor/a.txt", "/alice/stor/c.txt", "/alice/stor/e.txt"]
        );

        let single = fs.list_status("~~/stor/a.txt").await.unwrap();
        assert_eq!(single.len(), 1);
        assert!(fs.list_status("~~/nope").await.unwrap_err().is_not_found());
        assert!(fs.list_located_status("~~/nope", None).await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn delete_honors_the_recursive_flag() {
        let (_dir, _store, fs) = filesystem().await;
        write(&fs, "~~/stor/dir/file", b"x").await;

        assert!(!fs.delete("~~/stor/never-existed", true).await.unwrap());
        assert!(matches!(
            fs.delete("~~/stor/dir", false).await,
            Err(FsError::DirectoryNotEmpty(_))
        ));
        assert!(fs.exists("~~/stor/dir/file").await.unwrap());

        assert!(fs.delete("~~/stor/dir", true).await.unwrap());
        assert!(!fs.exists("~~/stor/dir").await.unwrap());
    }

    #[tokio::test]
    async fn rename_moves_files_and_into_directories() {
        let (_dir, _store, fs) = filesystem().await;
        write(&fs, "~~/stor/a", b"payload").await;
        assert!(fs.mkdirs("~~/stor/target").await.unwrap());

        assert!(fs.rename("~~/stor/a", "~~/stor/b").await.unwrap());
        assert!(!fs.exists("~~/stor/a").await.unwrap());
        assert_eq!(read(&fs, "~~/stor/b").await, b"payload");

        assert!(fs.rename("~~/stor/b", "~~/stor/target").await.unwrap());
        assert_eq!(read(&fs, "~~/stor/target/b").await, b"payload");

        assert!(fs.rename("~~/stor/missing", "~~/stor/c").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn file_and_directory_checks_treat_missing_as_false() {
        let (_dir, _store, fs) = filesystem().await;
        write(&fs, "~~/stor/f", b"x").await;

        assert!(fs.is_file("~~/stor/f").await.unwrap());
        assert!(!fs.is_directory("~~/stor/f").await.unwrap());
        assert!(fs.is_directory("~~/stor").await.unwrap());
        assert!(!fs.is_file("~~/stor").await.unwrap());
        assert!(!fs.is_file("~~/stor/missing").await.unwrap());
        assert!(!fs.is_directory("~~/stor/missing").await.unwrap());
    }

    #[tokio::test]
    async fn truncate_only_to_zero() {
        let (_dir, store, fs) = filesystem().await;
        let options = PutOptions {
            durability: None,
            content_type: Some("text/csv".into()),
        };
        store
            .put_bytes("/alice/stor/t.csv", Bytes::from_static(b"a,b\n1,2\n"), options)
            .await
            .unwrap();

        assert!(matches!(
            fs.truncate("~~/stor/t.csv", 5).await,
            Err(FsError::Unsupported(_))
        ));
        assert!(fs.truncate("~~/stor/t.csv", 0).await.unwrap());

        let head = store.head("/alice/stor/t.csv").await.unwrap();
        assert_eq!(head.size, Some(0));
        assert_eq!(head.content_type.as_deref(), Some("text/csv"));
        assert!(fs.truncate("~~/stor/missing", 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn checksums_of_whole_files_and_prefixes() {
        let (_dir, _store, fs) = filesystem().await;
        let fs = fs.with_remote_checksum_threshold(8);
        write(&fs, "~~/stor/small", b"tiny").await;
        write(&fs, "~~/stor/large", b"0123456789abcdef").await;

        assert_eq!(
            fs.get_file_checksum("~~/stor/small").await.unwrap(),
            Md5Digest::compute(b"tiny")
        );
        assert_eq!(
            fs.get_file_checksum_range("~~/stor/small", 2).await.unwrap(),
            Md5Digest::compute(b"ti")
        );
        assert_eq!(
            fs.get_file_checksum_range("~~/stor/large", 10).await.unwrap(),
            Md5Digest::compute(b"0123456789")
        );
        assert!(matches!(
            fs.get_file_checksum("~~/stor").await,
            Err(FsError::IsDirectory(_))
        ));
    }

    #[tokio::test]
    async fn local_trees_copy_both_ways() {
        let (dir, _store, fs) = filesystem().await;
        let local = dir.path().join("upload");
        std::fs::create_dir_all(local.join("sub")).unwrap();
        std::fs::write(local.join("top.txt"), b"top").unwrap();
        std::fs::write(local.join("sub/inner.txt"), b"inner").unwrap();

        fs.copy_from_local_file(false, false, &local, "~~/stor").await.unwrap();
        assert_eq!(read(&fs, "~~/stor/upload/top.txt").await, b"top");
        assert_eq!(read(&fs, "~~/stor/upload/sub/inner.txt").await, b"inner");

        assert!(matches!(
            fs.copy_from_local_file(false, false, local.join("top.txt"), "~~/stor/upload/top.txt")
                .await,
            Err(FsError::AlreadyExists(_))
        ));

        let single = dir.path().join("single.txt");
        std::fs::write(&single, b"moved").unwrap();
        fs.copy_from_local_file(true, false, &single, "~~/stor/new/place.txt")
            .await
            .unwrap();
        assert!(!single.exists());
        assert_eq!(read(&fs, "~~/stor/new/place.txt").await, b"moved");

        let download = dir.path().join("download");
        fs.copy_to_local_file(false, "~~/stor/upload", &download).await.unwrap();
        assert_eq!(std::fs::read(download.join("top.txt")).unwrap(), b"top");
        assert_eq!(std::fs::read(download.join("sub/inner.txt")).unwrap(), b"inner");

        fs.copy_to_local_file(true, "~~/stor/new/place.txt", &download)
            .await
            .unwrap();
        assert_eq!(std::fs::read(download.join("place.txt")).unwrap(), b"moved");
        assert!(!fs.exists("~~/stor/new/place.txt").await.unwrap());

        assert!(
            fs.copy_to_local_file(false, "~~/stor/missing", &download)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn usage_sums_every_storage_class() {
        let (_dir, _store, fs) = filesystem().await;
        match fs.get_used().await {
            Err(FsError::NotFound(msg)) => assert!(msg.contains("usage report")),
            other => panic!("unexpected result: {other:?}"),
        }

        let report = br#"{"storage": {
            "public": {"directories": "2", "keys": "3", "objects": "3", "bytes": "1024"},
            "stor": {"bytes": 2048},
            "jobs": {"keys": "0"}
        }}"#;
        write(&fs, "~~/reports/usage/storage/latest", report).await;
        assert_eq!(fs.get_used().await.unwrap(), 3072);
    }

    #[tokio::test]
    async fn usage_totals_that_overflow_are_errors() {
        let (_dir, _store, fs) = filesystem().await;
        let report = br#"{"storage": {
            "stor": {"bytes": "18446744073709551615"},
            "public": {"bytes": 1}
        }}"#;
        write(&fs, "~~/reports/usage/storage/latest", report).await;

        match fs.get_used().await {
            Err(FsError::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::InvalidData),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
