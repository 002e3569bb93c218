use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::{env, str::FromStr};

use crate::{fs::checksum::REMOTE_CHECKSUM_THRESHOLD, services::local_store::MAX_PAGE_SIZE};

/// Centralized filesystem configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FsConfig {
    pub user: String,
    pub home_directory: String,
    pub storage_dir: String,
    pub database_url: String,
    pub remote_checksum_threshold: u64,
    pub page_size: usize,
}

/// Command-line configuration, shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Account name, optionally `account/subuser` (overrides MANTA_USER)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Directory where object payloads are stored (overrides MANTA_FS_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Metadata database URL (overrides MANTA_FS_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Size above which checksums run as a remote job
    /// (overrides MANTA_FS_REMOTE_CHECKSUM_THRESHOLD)
    #[arg(long, global = true)]
    pub remote_checksum_threshold: Option<u64>,

    /// Entries per listing page, 1 to 1000 (overrides MANTA_FS_PAGE_SIZE)
    #[arg(long, global = true)]
    pub page_size: Option<usize>,

    /// Print the resolved configuration before running
    #[arg(long, global = true)]
    pub dump_config: bool,
}

impl FsConfig {
    /// Merge CLI args over the process environment.
    pub fn from_env_and_args(args: &ConfigArgs) -> Result<Self> {
        Self::from_lookup(args, |name| env::var(name))
    }

    fn from_lookup(
        args: &ConfigArgs,
        lookup: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        // --- Environment fallback ---
        let env_user = lookup("MANTA_USER").unwrap_or_else(|_| "anonymous".into());
        let env_storage =
            lookup("MANTA_FS_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = lookup("MANTA_FS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/manta_fs.db".into());
        let env_threshold = parse_var(
            &lookup,
            "MANTA_FS_REMOTE_CHECKSUM_THRESHOLD",
            REMOTE_CHECKSUM_THRESHOLD,
        )?;
        let env_page_size = parse_var(&lookup, "MANTA_FS_PAGE_SIZE", MAX_PAGE_SIZE)?;

        // --- Merge ---
        let user = args.user.clone().unwrap_or(env_user);
        Ok(Self {
            home_directory: home_from_user(&user),
            user,
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            remote_checksum_threshold: args.remote_checksum_threshold.unwrap_or(env_threshold),
            page_size: args
                .page_size
                .unwrap_or(env_page_size)
                .clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// Whether `--dump-config` or MANTA_FS_DUMP_CONFIG asks for the config.
    pub fn dump_requested(args: &ConfigArgs) -> Result<bool> {
        if args.dump_config {
            return Ok(true);
        }
        parse_var(&|name: &str| env::var(name), "MANTA_FS_DUMP_CONFIG", false)
    }
}

/// Home directory of an account. Subusers (`account/subuser`) share the
/// account's home.
pub fn home_from_user(user: &str) -> String {
    let account = user.split('/').next().unwrap_or(user);
    format!("/{}", account)
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Result<String, env::VarError>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
