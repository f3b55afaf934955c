//! Service configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::error::IngestError;

pub const DEFAULT_POOL_SIZE: usize = 8;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// PostgreSQL connection string
    pub database_url: Option<String>,

    /// Maximum number of pooled database connections
    pub pool_size: usize,

    /// Largest source object that will be read
    pub max_file_bytes: u64,

    /// Apply pending embedded migrations on startup
    pub run_migrations: bool,

    /// Files ingested at the same time
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_size: DEFAULT_POOL_SIZE,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            run_migrations: true,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_URL` (required by the binary)
    /// - `DATABASE_POOL_SIZE` (default: 8)
    /// - `INGEST_MAX_FILE_BYTES` (default: 67108864)
    /// - `RUN_MIGRATIONS` (default: true)
    /// - `INGEST_CONCURRENCY` (default: 4)
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IngestError> {
        let defaults = Self::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            pool_size: parse_var(&lookup, "DATABASE_POOL_SIZE")?.unwrap_or(defaults.pool_size),
            max_file_bytes: parse_var(&lookup, "INGEST_MAX_FILE_BYTES")?
                .unwrap_or(defaults.max_file_bytes),
            run_migrations: parse_var(&lookup, "RUN_MIGRATIONS")?
                .unwrap_or(defaults.run_migrations),
            concurrency: parse_var::<usize>(&lookup, "INGEST_CONCURRENCY")?
                .unwrap_or(defaults.concurrency)
                .max(1),
        })
    }

    pub fn database_url(&self) -> Result<&str, IngestError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| IngestError::Config {
                message: "DATABASE_URL environment variable is required".to_string(),
            })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, IngestError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| IngestError::Config {
            message: format!("Invalid value for {}: '{}'", key, raw),
        }),
    }
}

/// Replaces the credentials of a connection URL with `***` for logging.
pub fn mask_database_url(database_url: &str) -> String {
    let Some(scheme_end) = database_url.find("://").map(|i| i + 3) else {
        return database_url.to_string();
    };
    match database_url.rfind('@') {
        Some(at) if at > scheme_end => format!(
            "{}***{}",
            &database_url[..scheme_end],
            &database_url[at..]
        ),
        _ => database_url.to_string(),
    }
}
