use crate::services::{
    checksum::{self, ChecksumAlgorithm},
    expiration::{ExpirationPolicy, MAX_DURATION_DAYS},
    id_generator::MAX_WORKER_ID,
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub max_size: u64,
    pub checksum_algorithms: Vec<ChecksumAlgorithm>,
    pub duration_days: i64,
    pub context_path: String,
    pub worker_id: u16,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable upload server (tus 1.0.0)")]
pub struct Args {
    /// Host to bind to (overrides TUS_SERVER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TUS_SERVER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where upload payloads are stored (overrides TUS_SERVER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides TUS_SERVER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum upload size in bytes (overrides TUS_SERVER_MAX_SIZE)
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Comma separated checksum algorithms (overrides TUS_SERVER_CHECKSUM_ALGORITHMS)
    #[arg(long)]
    pub checksum_algorithms: Option<String>,

    /// Days an upload stays writable after creation (overrides TUS_SERVER_DURATION_DAYS)
    #[arg(long)]
    pub duration_days: Option<i64>,

    /// Path the tus endpoints are mounted under (overrides TUS_SERVER_CONTEXT_PATH)
    #[arg(long)]
    pub context_path: Option<String>,

    /// Worker id embedded in generated upload ids (overrides TUS_SERVER_WORKER_ID)
    #[arg(long)]
    pub worker_id: Option<u16>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Protocol settings shared by the upload coordinator and the HTTP handlers.
#[derive(Debug, Clone)]
pub struct TusSettings {
    pub max_size: u64,
    pub checksum_algorithms: Vec<ChecksumAlgorithm>,
    pub expiration: ExpirationPolicy,
    pub context_path: String,
}

impl TusSettings {
    /// Value for the `Tus-Checksum-Algorithm` header.
    pub fn checksum_algorithm_header(&self) -> String {
        checksum::format_algorithm_list(&self.checksum_algorithms)
    }

    /// Public location of an upload.
    pub fn location(&self, id: i64) -> String {
        format!("{}/{}", self.context_path, id)
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("TUS_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("TUS_SERVER_PORT", 3000u16)?;
        let env_storage =
            env::var("TUS_SERVER_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_db = env::var("TUS_SERVER_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/tus_store.db".into());
        let env_max_size = env_parse("TUS_SERVER_MAX_SIZE", 1024u64 * 1024 * 1024)?;
        let env_algorithms =
            env::var("TUS_SERVER_CHECKSUM_ALGORITHMS").unwrap_or_else(|_| "md5,sha1".into());
        let env_duration = env_parse("TUS_SERVER_DURATION_DAYS", 7i64)?;
        let env_context =
            env::var("TUS_SERVER_CONTEXT_PATH").unwrap_or_else(|_| "/tus/upload".into());
        let env_worker = env_parse("TUS_SERVER_WORKER_ID", 0u16)?;

        // --- Merge ---
        let algorithms = args.checksum_algorithms.unwrap_or(env_algorithms);
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_size: args.max_size.unwrap_or(env_max_size),
            checksum_algorithms: checksum::parse_algorithm_list(&algorithms)
                .with_context(|| format!("parsing checksum algorithms `{}`", algorithms))?,
            duration_days: args.duration_days.unwrap_or(env_duration),
            context_path: normalize_context_path(&args.context_path.unwrap_or(env_context))?,
            worker_id: args.worker_id.unwrap_or(env_worker),
        };
        cfg.validate()?;

        Ok((cfg, args.migrate))
    }

    fn validate(&self) -> Result<()> {
        if self.worker_id > MAX_WORKER_ID {
            bail!("worker id {} exceeds maximum {}", self.worker_id, MAX_WORKER_ID);
        }
        if !(0..=MAX_DURATION_DAYS).contains(&self.duration_days) {
            bail!(
                "upload duration must be between 0 and {} days, got {}",
                MAX_DURATION_DAYS,
                self.duration_days
            );
        }
        if self.max_size == 0 || self.max_size > i64::MAX as u64 {
            bail!("max size {} is out of range", self.max_size);
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tus_settings(&self) -> TusSettings {
        TusSettings {
            max_size: self.max_size,
            checksum_algorithms: self.checksum_algorithms.clone(),
            expiration: ExpirationPolicy::new(self.duration_days),
            context_path: self.context_path.clone(),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Trim trailing slashes and require a leading one: `/tus/upload/` becomes `/tus/upload`.
fn normalize_context_path(path: &str) -> Result<String> {
    let trimmed = path.trim().trim_end_matches('/');
    if !trimmed.starts_with('/') || trimmed.len() < 2 {
        bail!("context path must start with `/` and name a segment, got `{}`", path);
    }
    if trimmed.contains('{') || trimmed.contains('}') {
        bail!("context path must not contain route parameters, got `{}`", path);
    }
    Ok(trimmed.to_string())
}
