//! Ingestion pipeline: parse, aggregate, then atomically replace the dataset
//! registered under the same name.
//!
//! Parsing and aggregation never touch storage, and dropping the ingestion
//! future during those phases abandons it cleanly. The replace transaction
//! runs on its own task while holding the per-name lock, so once it has
//! started it either commits or rolls back even if the caller goes away.

use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn, Instrument, Span};
use uuid::Uuid;

use crate::aggregate::compute_aggregates;
use crate::domain::{DataPointRow, IngestPhase, IngestReport, NewDataset};
use crate::error::{IngestError, ValidationError};
use crate::locks::{NameGuard, NameLocks};
use crate::parser::RowReader;
use crate::store::DatasetStore;

pub const MAX_NAME_LEN: usize = 255;

/// Rows parsed between two yields to the runtime.
const YIELD_EVERY_ROWS: usize = 1_000;

pub struct IngestionCoordinator<S: DatasetStore> {
    store: Arc<S>,
    locks: NameLocks,
}

impl<S: DatasetStore> IngestionCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self::with_shared_store(Arc::new(store))
    }

    pub fn with_shared_store(store: Arc<S>) -> Self {
        Self {
            store,
            locks: NameLocks::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn ingest<R: Read>(
        &self,
        name: &str,
        reader: R,
    ) -> Result<IngestReport, IngestError> {
        self.ingest_at(name, reader, Utc::now()).await
    }

    pub async fn ingest_bytes(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<IngestReport, IngestError> {
        self.ingest(name, bytes).await
    }

    /// Ingests `reader` as dataset `name`, accepting timestamps up to `now`.
    #[instrument(skip(self, reader, now), fields(ingestion_id = %Uuid::new_v4()))]
    pub async fn ingest_at<R: Read>(
        &self,
        name: &str,
        reader: R,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, IngestError> {
        let mut phase = IngestPhase::Idle;
        let result = self.run(name, reader, now, &mut phase).await;

        match &result {
            Ok(report) => info!(
                phase = %IngestPhase::Committed,
                "Dataset '{}' committed as {} with {} rows",
                report.name, report.dataset_id, report.row_count
            ),
            Err(e) => warn!(
                phase = %phase.on_failure(),
                "Ingestion of '{}' failed while {}: {}",
                name, phase, e
            ),
        }

        result
    }

    async fn run<R: Read>(
        &self,
        name: &str,
        reader: R,
        now: DateTime<Utc>,
        phase: &mut IngestPhase,
    ) -> Result<IngestReport, IngestError> {
        validate_dataset_name(name)?;

        enter(phase, IngestPhase::Parsing);
        let rows = read_rows(reader, now).await?;

        enter(phase, IngestPhase::Aggregating);
        let aggregates = compute_aggregates(&rows)?;

        let guard = self.locks.acquire(name).await;

        enter(phase, IngestPhase::Transacting);
        let dataset = NewDataset {
            name: name.to_string(),
            aggregates,
            points: rows,
        };
        let store = Arc::clone(&self.store);
        let commit =
            tokio::spawn(replace_dataset(store, dataset, guard).instrument(Span::current()));

        commit.await.map_err(|e| IngestError::Transaction {
            message: format!("Commit task failed: {}", e),
        })?
    }
}

fn enter(phase: &mut IngestPhase, next: IngestPhase) {
    debug!("Ingestion phase {} -> {}", phase, next);
    *phase = next;
}

pub fn validate_dataset_name(name: &str) -> Result<(), IngestError> {
    if name.is_empty() {
        return Err(IngestError::InvalidName {
            message: "Dataset name is required".to_string(),
        });
    }
    let length = name.chars().count();
    if length > MAX_NAME_LEN {
        return Err(IngestError::InvalidName {
            message: format!(
                "Dataset name is {} characters long, the limit is {}",
                length, MAX_NAME_LEN
            ),
        });
    }
    Ok(())
}

async fn read_rows<R: Read>(
    reader: R,
    now: DateTime<Utc>,
) -> Result<Vec<DataPointRow>, ValidationError> {
    let mut rows = Vec::new();
    for row in RowReader::with_clock(reader, now) {
        rows.push(row?);
        if rows.len() % YIELD_EVERY_ROWS == 0 {
            tokio::task::yield_now().await;
        }
    }

    if rows.is_empty() {
        return Err(ValidationError::EmptyFile);
    }
    Ok(rows)
}

/// Deletes any dataset named like `dataset` and inserts `dataset` in its
/// place, all inside one transaction.
async fn replace_dataset<S: DatasetStore>(
    store: Arc<S>,
    dataset: NewDataset,
    _guard: NameGuard,
) -> Result<IngestReport, IngestError> {
    let name = dataset.name.clone();
    let aggregates = dataset.aggregates.clone();
    let row_count = dataset.points.len();

    let (dataset_id, replaced) = store
        .transaction(move |tx| {
            Box::pin(async move {
                let previous = tx.find_by_name(&dataset.name).await?;
                if let Some(previous) = &previous {
                    debug!("Replacing dataset '{}' (id {})", previous.name, previous.id);
                    tx.delete_dataset(previous.id).await?;
                }

                let inserted = tx.insert_dataset(&dataset).await?;
                if inserted.point_ids.len() != dataset.points.len() {
                    return Err(IngestError::Transaction {
                        message: format!(
                            "Inserted {} data points, expected {}",
                            inserted.point_ids.len(),
                            dataset.points.len()
                        ),
                    });
                }

                Ok((inserted.dataset_id, previous.map(|p| p.id)))
            })
        })
        .await?;

    Ok(IngestReport {
        dataset_id,
        name,
        row_count,
        replaced,
        aggregates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 12, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_reports_aggregates() {
        let coordinator = IngestionCoordinator::new(MemoryStore::new());
        let input = "2024-01-15T10:30:00.000Z;1.0;10.0\n2024-01-15T10:31:00.000Z;2.0;20.0\n2024-01-15T10:32:00.000Z;3.0;30.0";

        let report = coordinator
            .ingest_at("test.csv", input.as_bytes(), now())
            .await
            .unwrap();

        assert_eq!(report.row_count, 3);
        assert_eq!(report.replaced, None);
        assert_eq!(report.aggregates.delta_time, dec!(120));
        assert_eq!(report.aggregates.median_value, dec!(20));
        assert_eq!(coordinator.store().points(report.dataset_id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_names_never_reach_storage() {
        let coordinator = IngestionCoordinator::new(MemoryStore::new());
        let input = "2024-01-15T10:30:00Z;1;1";

        let empty = coordinator.ingest_at("", input.as_bytes(), now()).await;
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        let long = coordinator.ingest_at(&long_name, input.as_bytes(), now()).await;

        assert!(matches!(empty, Err(IngestError::InvalidName { .. })));
        assert!(matches!(long, Err(IngestError::InvalidName { .. })));
        assert_eq!(coordinator.store().transactions_started(), 0);
    }

    #[tokio::test]
    async fn test_name_at_limit_is_accepted() {
        let coordinator = IngestionCoordinator::new(MemoryStore::new());
        let name = "é".repeat(MAX_NAME_LEN);

        let report = coordinator
            .ingest_at(&name, "2024-01-15T10:30:00Z;1;1".as_bytes(), now())
            .await
            .unwrap();

        assert_eq!(report.name, name);
    }

    #[tokio::test]
    async fn test_lock_is_released_after_ingestion() {
        let coordinator = IngestionCoordinator::new(MemoryStore::new());
        coordinator
            .ingest_at("a.csv", "2024-01-15T10:30:00Z;1;1".as_bytes(), now())
            .await
            .unwrap();

        assert_eq!(coordinator.locks.active(), 0);
    }
}
