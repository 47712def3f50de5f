use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Seconds between janitor sweeps for abandoned uploads.
    pub janitor_interval_secs: u64,
    /// Hours an incomplete upload may sit untouched before reclamation.
    pub janitor_max_age_hours: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked file-transfer service")]
pub struct Args {
    /// Host to bind to (overrides FILEFERRY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEFERRY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where chunks and merged files are stored (overrides FILEFERRY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILEFERRY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Seconds between janitor sweeps (overrides FILEFERRY_JANITOR_INTERVAL_SECS)
    #[arg(long)]
    pub janitor_interval_secs: Option<u64>,

    /// Age in hours after which incomplete uploads are reclaimed
    /// (overrides FILEFERRY_JANITOR_MAX_AGE_HOURS)
    #[arg(long)]
    pub janitor_max_age_hours: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("FILEFERRY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env_or("FILEFERRY_PORT", 8000u16)?;
        let env_storage = env::var("FILEFERRY_STORAGE_DIR").unwrap_or_else(|_| "./data/storage".into());
        let env_db = env::var("FILEFERRY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/fileferry.db".into());
        let env_interval = parse_env_or("FILEFERRY_JANITOR_INTERVAL_SECS", 3600u64)?;
        let env_max_age = parse_env_or("FILEFERRY_JANITOR_MAX_AGE_HOURS", 6u64)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            janitor_interval_secs: args.janitor_interval_secs.unwrap_or(env_interval),
            janitor_max_age_hours: args.janitor_max_age_hours.unwrap_or(env_max_age),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read a numeric environment variable, falling back to `default` when unset.
fn parse_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).context(format!("reading {}", name)),
    }
}
