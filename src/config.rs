use crate::{
    models::upload::{
        DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_THRESHOLD, DEFAULT_MEMORY_CEILING, UploadMode,
        WriterSettings,
    },
    services::filesystem::{DEFAULT_LIST_PAGE_SIZE, FsOptions},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub buffer_size: usize,
    pub memory_ceiling: u64,
    pub chunk_threshold: u64,
    pub list_page_size: usize,
    pub upload_mode: UploadMode,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Filesystem view over a flat object store")]
pub struct Args {
    /// Host to bind to (overrides BUCKETFS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKETFS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides BUCKETFS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BUCKETFS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Per-session write buffer in bytes (overrides BUCKETFS_BUFFER_SIZE)
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Ceiling on bytes buffered across all sessions (overrides BUCKETFS_MEMORY_CEILING)
    #[arg(long)]
    pub memory_ceiling: Option<u64>,

    /// Size at which uploads switch to chunk objects (overrides BUCKETFS_CHUNK_THRESHOLD)
    #[arg(long)]
    pub chunk_threshold: Option<u64>,

    /// Objects fetched per listing page (overrides BUCKETFS_LIST_PAGE_SIZE)
    #[arg(long)]
    pub list_page_size: Option<usize>,

    /// Upload strategy for write handles (overrides BUCKETFS_UPLOAD_MODE)
    #[arg(long, value_enum)]
    pub upload_mode: Option<UploadMode>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment, environment over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("BUCKETFS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_storage =
            env::var("BUCKETFS_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("BUCKETFS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/bucketfs.db".into());

        let upload_mode = match args.upload_mode {
            Some(mode) => mode,
            None => match env::var("BUCKETFS_UPLOAD_MODE") {
                Ok(value) => <UploadMode as ValueEnum>::from_str(&value, true)
                    .map_err(|err| anyhow::anyhow!(err))
                    .with_context(|| format!("parsing BUCKETFS_UPLOAD_MODE value `{}`", value))?,
                Err(env::VarError::NotPresent) => UploadMode::default(),
                Err(err) => return Err(err).context("reading BUCKETFS_UPLOAD_MODE"),
            },
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: pick(args.port, "BUCKETFS_PORT", 3000)?,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            buffer_size: pick(args.buffer_size, "BUCKETFS_BUFFER_SIZE", DEFAULT_BUFFER_SIZE)?,
            memory_ceiling: pick(
                args.memory_ceiling,
                "BUCKETFS_MEMORY_CEILING",
                DEFAULT_MEMORY_CEILING,
            )?,
            chunk_threshold: pick(
                args.chunk_threshold,
                "BUCKETFS_CHUNK_THRESHOLD",
                DEFAULT_CHUNK_THRESHOLD,
            )?,
            list_page_size: pick(
                args.list_page_size,
                "BUCKETFS_LIST_PAGE_SIZE",
                DEFAULT_LIST_PAGE_SIZE,
            )?,
            upload_mode,
        };

        if cfg.buffer_size == 0 {
            anyhow::bail!("buffer size must be greater than zero");
        }
        if cfg.list_page_size == 0 {
            anyhow::bail!("list page size must be greater than zero");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn fs_options(&self) -> FsOptions {
        FsOptions {
            writer: WriterSettings {
                buffer_size: self.buffer_size,
                memory_ceiling: self.memory_ceiling,
                chunk_threshold: self.chunk_threshold,
            },
            upload_mode: self.upload_mode,
            list_page_size: self.list_page_size,
        }
    }
}

/// CLI value, else parsed env var, else default.
fn pick<T>(cli: Option<T>, var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match env::var(var) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", var, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", var)),
    }
}
