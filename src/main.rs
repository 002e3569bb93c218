use anyhow::Result;
use clap::Parser;
use manta_fs::{
    config::FsConfig,
    errors::FsError,
    routes::commands::{Cli, dispatch},
    services::{filesystem::MantaFileSystem, local_store::LocalObjectStore},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, path::Path, process::ExitCode, str::FromStr, sync::Arc};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("manta-fs: {:#}", err);
            let code = err
                .downcast_ref::<FsError>()
                .map(FsError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run() -> Result<()> {
    // --- Parse config + migrate flag ---
    let cli = Cli::parse();
    let cfg = FsConfig::from_env_and_args(&cli.config)?;
    if FsConfig::dump_requested(&cli.config)? {
        eprintln!("{}", serde_json::to_string_pretty(&cfg)?);
    }
    tracing::debug!("Starting manta-fs with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if db_path != ":memory:"
        && let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
        tracing::info!("Created missing directory {:?}", parent);
    }

    let options = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    let store = LocalObjectStore::new(db, &cfg.storage_dir).with_page_size(cfg.page_size);
    store.migrate().await?;

    // --- Handle migration mode ---
    if cli.migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let Some(command) = cli.command else {
        anyhow::bail!("no command given, see --help");
    };

    let filesystem = MantaFileSystem::new(Arc::new(store), &cfg.home_directory)
        .with_remote_checksum_threshold(cfg.remote_checksum_threshold);
    filesystem.mkdirs(&cfg.home_directory).await?;

    let mut out = tokio::io::stdout();
    let result = dispatch(&filesystem, command, &mut out).await;
    out.flush().await?;
    filesystem.close().await?;
    result
}
