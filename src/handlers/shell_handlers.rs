//! Shell command handlers.
//! Each handler drives one filesystem operation and renders the result on
//! `out`; failures keep their `FsError` so the binary can pick an exit code.

use std::{path::Path, sync::Arc};

use anyhow::Result;
use chrono::SecondsFormat;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{
    errors::FsError,
    fs::ProgressCallback,
    models::{FileStatus, LocatedStatus},
    services::filesystem::{DEFAULT_REPLICATION, MantaFileSystem},
};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// `ls [PATH] [--json]`
pub async fn list<W: AsyncWrite + Unpin>(
    fs: &MantaFileSystem,
    path: &str,
    json: bool,
    out: &mut W,
) -> Result<()> {
    let mut lister = fs.list_located_status(path, None).await?;
    let mut entries: Vec<LocatedStatus> = Vec::new();
    while lister.has_next() {
        let located = lister.next().await?;
        if !json {
            write_line(out, &status_line(&located.status)).await?;
        }
        entries.push(located);
    }

    if json {
        write_json(out, &entries).await?;
    }
    Ok(())
}

/// `stat PATH [--json]`
pub async fn stat<W: AsyncWrite + Unpin>(
    fs: &MantaFileSystem,
    path: &str,
    json: bool,
    out: &mut W,
) -> Result<()> {
    let status = fs.get_file_status(path).await?;
    if json {
        return write_json(out, &status).await;
    }

    let kind = if status.is_directory { "directory" } else { "file" };
    let text = format!(
        "path: {}\ntype: {}\nlength: {}\nreplication: {}\nmodified: {}\n",
        status.path,
        kind,
        status.length,
        status.replication,
        status
            .modification_time
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    );
    out.write_all(text.as_bytes()).await?;
    Ok(())
}

/// `cat PATH`
pub async fn cat<W: AsyncWrite + Unpin>(
    fs: &MantaFileSystem,
    path: &str,
    out: &mut W,
) -> Result<()> {
    let reader = fs.open(path).await?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
    }
    reader.close().await?;
    Ok(())
}

/// `put LOCAL REMOTE [--overwrite] [--replication N]`
///
/// Directories are copied recursively; single files stream through
/// [`MantaFileSystem::create`] with progress logging.
pub async fn put<W: AsyncWrite + Unpin>(
    fs: &MantaFileSystem,
    local: &Path,
    remote: &str,
    overwrite: bool,
    replication: Option<u16>,
    out: &mut W,
) -> Result<()> {
    let metadata = tokio::fs::metadata(local).await.map_err(FsError::from)?;
    if metadata.is_dir() {
        fs.copy_from_local_file(false, overwrite, local, remote).await?;
        write_line(out, &format!("copied {} to {}", local.display(), remote)).await?;
        return Ok(());
    }

    let mut target = remote.to_string();
    if fs.is_directory(remote).await?
        && let Some(name) = local.file_name()
    {
        target = format!("{}/{}", remote.trim_end_matches('/'), name.to_string_lossy());
    }

    let key = fs.resolve(&target)?;
    let progress_key = key.clone();
    let progress: ProgressCallback = Arc::new(move || -> anyhow::Result<()> {
        debug!("upload to {} still in progress", progress_key);
        Ok(())
    });

    let replication = replication.unwrap_or(DEFAULT_REPLICATION);
    let mut source = tokio::fs::File::open(local).await.map_err(FsError::from)?;
    let mut sink = fs.create(&target, overwrite, replication, Some(progress)).await?;
    let copied = tokio::io::copy(&mut source, &mut sink).await?;
    sink.shutdown().await?;

    write_line(out, &format!("uploaded {} bytes to {}", copied, key)).await?;
    Ok(())
}

/// `get REMOTE LOCAL`
pub async fn get<W: AsyncWrite + Unpin>(
    fs: &MantaFileSystem,
    remote: &str,
    local: &Path,
    out: &mut W,
) -> Result<()> {
    fs.copy_to_local_file(false, remote, local).await?;
    write_line(out, &format!("copied {} to {}", remote, local.display())).await?;
    Ok(())
}

/// `mkdir PATH`
pub async fn mkdir(fs: &MantaFileSystem, path: &str) -> Result<()> {
    if !fs.mkdirs(path).await? {
        anyhow::bail!("directory {} was not created", path);
    }
    Ok(())
}

/// `rm PATH [-r]`
pub async fn remove(fs: &MantaFileSystem, path: &str, recursive: bool) -> Result<()> {
    if !fs.delete(path, recursive).await? {
        return Err(FsError::not_found(fs.resolve(path)?).into());
    }
    Ok(())
}

/// `mv FROM TO`
pub async fn rename(fs: &MantaFileSystem, from: &str, to: &str) -> Result<()> {
    if !fs.rename(from, to).await? {
        anyhow::bail!("{} is not visible at {} after the move", from, to);
    }
    Ok(())
}

/// `truncate PATH [LENGTH]`
pub async fn truncate(fs: &MantaFileSystem, path: &str, length: u64) -> Result<()> {
    fs.truncate(path, length).await?;
    Ok(())
}

/// `checksum PATH [--length N]`, printed the way `md5sum` does.
pub async fn checksum<W: AsyncWrite + Unpin>(
    fs: &MantaFileSystem,
    path: &str,
    length: Option<u64>,
    out: &mut W,
) -> Result<()> {
    let digest = match length {
        Some(length) => fs.get_file_checksum_range(path, length).await?,
        None => fs.get_file_checksum(path).await?,
    };
    write_line(out, &format!("{}  {}", digest, fs.resolve(path)?)).await?;
    Ok(())
}

/// `du`
pub async fn usage<W: AsyncWrite + Unpin>(fs: &MantaFileSystem, out: &mut W) -> Result<()> {
    let used = fs.get_used().await?;
    write_line(out, &used.to_string()).await?;
    Ok(())
}

fn status_line(status: &FileStatus) -> String {
    let kind = if status.is_directory { 'd' } else { '-' };
    format!(
        "{} {:>2} {:>12} {} {}",
        kind,
        status.replication,
        status.length,
        status
            .modification_time
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        status.path
    )
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    Ok(())
}

async fn write_json<W: AsyncWrite + Unpin, T: Serialize + ?Sized>(
    out: &mut W,
    value: &T,
) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    write_line(out, &rendered).await
}
