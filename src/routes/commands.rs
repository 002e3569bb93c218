use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWrite;

use crate::{
    config::ConfigArgs,
    handlers::shell_handlers::{
        cat, checksum, get, list, mkdir, put, remove, rename, stat, truncate, usage,
    },
    services::filesystem::MantaFileSystem,
};

/// Filesystem shell over a Manta-style object store
#[derive(Parser, Debug)]
#[command(name = "manta-fs", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Initialize the metadata schema and exit
    #[arg(long, global = true)]
    pub migrate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = ".")]
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Show the status of a path
    Stat {
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Write a file to stdout
    Cat { path: String },
    /// Upload a local file or directory
    Put {
        local: PathBuf,
        remote: String,
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        replication: Option<u16>,
    },
    /// Download a file or directory
    Get { remote: String, local: PathBuf },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// Remove a file or directory
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Move or rename a path
    Mv { from: String, to: String },
    /// Truncate a file to zero length
    Truncate {
        path: String,
        #[arg(default_value_t = 0)]
        length: u64,
    },
    /// MD5 of a file or of its first LENGTH bytes
    Checksum {
        path: String,
        #[arg(long)]
        length: Option<u64>,
    },
    /// Bytes stored by the account
    Du,
}

/// Route a parsed command to its handler.
pub async fn dispatch<W: AsyncWrite + Unpin>(
    fs: &MantaFileSystem,
    command: Command,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Ls { path, json } => list(fs, &path, json, out).await,
        Command::Stat { path, json } => stat(fs, &path, json, out).await,
        Command::Cat { path } => cat(fs, &path, out).await,
        Command::Put {
            local,
            remote,
            overwrite,
            replication,
        } => put(fs, &local, &remote, overwrite, replication, out).await,
        Command::Get { remote, local } => get(fs, &remote, &local, out).await,
        Command::Mkdir { path } => mkdir(fs, &path).await,
        Command::Rm { path, recursive } => remove(fs, &path, recursive).await,
        Command::Mv { from, to } => rename(fs, &from, &to).await,
        Command::Truncate { path, length } => truncate(fs, &path, length).await,
        Command::Checksum { path, length } => checksum(fs, &path, length, out).await,
        Command::Du => usage(fs, out).await,
    }
}
