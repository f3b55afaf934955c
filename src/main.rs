use anyhow::{bail, Context};
use futures::StreamExt;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ingest_service::config::{mask_database_url, IngestConfig};
use ingest_service::domain::IngestReport;
use ingest_service::source::{SourceLocation, SourceReader};
use ingest_service::{DatabaseManager, IngestError, IngestionCoordinator};

/// Attempts per file when a concurrent writer claimed the same name first.
const MAX_ATTEMPTS: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingest_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ingest Service v{}", env!("CARGO_PKG_VERSION"));

    let locations: Vec<String> = std::env::args().skip(1).collect();
    if locations.is_empty() {
        bail!("usage: ingest-service <file-or-directory>...");
    }

    let config = IngestConfig::from_env().context("Invalid configuration")?;
    let database_url = config.database_url()?;

    info!("Configuration loaded:");
    info!("  Database URL: {}", mask_database_url(database_url));
    info!("  Pool size: {}", config.pool_size);
    info!("  Max file size: {} bytes", config.max_file_bytes);
    info!("  Concurrency: {}", config.concurrency);

    let database = DatabaseManager::new(database_url, config.pool_size).await?;
    if config.run_migrations {
        database
            .run_migrations(database_url)
            .await
            .context("Failed to migrate database")?;
    }

    let coordinator = IngestionCoordinator::new(database);
    let reader = SourceReader::new(config.max_file_bytes);

    let mut files = Vec::new();
    for raw in &locations {
        let location = SourceLocation::parse(raw)?;
        let listed = reader
            .list(&location)
            .await
            .with_context(|| format!("Failed to list {}", location))?;
        files.extend(listed);
    }

    let total = files.len();
    let run = async {
        futures::stream::iter(files)
            .map(|file| {
                let coordinator = &coordinator;
                let reader = &reader;
                async move {
                    let result = ingest_file(coordinator, reader, &file).await;
                    (file, result)
                }
            })
            .buffer_unordered(config.concurrency)
            .fold(0usize, |failures, (file, result)| async move {
                match result {
                    Ok(report) => match serde_json::to_string(&report) {
                        Ok(json) => {
                            println!("{}", json);
                            failures
                        }
                        Err(e) => {
                            error!("Failed to render report for {}: {}", file, e);
                            failures + 1
                        }
                    },
                    Err(e) => {
                        error!("Failed to ingest {}: {}", file, e);
                        failures + 1
                    }
                }
            })
            .await
    };

    // Dropping `run` abandons files still being parsed. A commit in flight
    // loses its connection on shutdown and PostgreSQL rolls it back.
    let failures = tokio::select! {
        failures = run => failures,
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal, stopping ingestion..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            bail!("Ingestion interrupted");
        }
    };

    info!("Ingested {} of {} files", total - failures, total);
    if failures > 0 {
        bail!("{} of {} files failed to ingest", failures, total);
    }
    Ok(())
}

async fn ingest_file(
    coordinator: &IngestionCoordinator<DatabaseManager>,
    reader: &SourceReader,
    location: &SourceLocation,
) -> Result<IngestReport, IngestError> {
    let file = reader.read(location).await?;

    let mut attempt = 1;
    loop {
        match coordinator.ingest_bytes(&file.name, &file.bytes).await {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(
                    "Attempt {} for '{}' conflicted, retrying: {}",
                    attempt, file.name, e
                );
                attempt += 1;
            }
            result => return result,
        }
    }
}
