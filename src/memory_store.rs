//! In-process dataset store.
//!
//! Each transaction works on a private snapshot and records its writes; on
//! commit the writes are replayed against the latest committed state under a
//! lock and applied only if all of them still hold. A dataset name that was
//! claimed by a transaction committed in between is rejected as a conflict,
//! the same way the unique index does it in PostgreSQL.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::domain::{DataPointRow, InsertedDataset, NewDataset, StoredDataset};
use crate::error::IngestError;
use crate::store::{DatasetStore, DatasetTransaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    datasets: BTreeMap<i32, StoredDataset>,
    points: BTreeMap<i64, StoredPoint>,
}

#[derive(Debug, Clone)]
struct StoredPoint {
    dataset_id: i32,
    row: DataPointRow,
}

#[derive(Debug)]
enum WriteOp {
    Delete { id: i32 },
    Insert { dataset: StoredDataset, points: Vec<(i64, DataPointRow)> },
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_insert: AtomicBool,
    fail_next_commit: AtomicBool,
}

#[derive(Debug)]
struct Sequences {
    dataset_id: AtomicI32,
    point_id: AtomicI64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            dataset_id: AtomicI32::new(1),
            point_id: AtomicI64::new(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    sequences: Arc<Sequences>,
    faults: Arc<Faults>,
    transactions: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `insert_dataset` call fail inside its transaction.
    pub fn fail_next_insert(&self) {
        self.faults.fail_next_insert.store(true, Ordering::SeqCst);
    }

    /// Makes the next transaction fail at commit time, after all its work succeeded.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of transactions opened so far, committed or not.
    pub fn transactions_started(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn dataset(&self, name: &str) -> Result<Option<StoredDataset>, IngestError> {
        let state = self.lock()?;
        Ok(state.find_by_name(name).cloned())
    }

    pub fn dataset_count(&self) -> Result<usize, IngestError> {
        Ok(self.lock()?.datasets.len())
    }

    /// Data points owned by `dataset_id`, in insertion order.
    pub fn points(&self, dataset_id: i32) -> Result<Vec<DataPointRow>, IngestError> {
        let state = self.lock()?;
        Ok(state
            .points
            .values()
            .filter(|point| point.dataset_id == dataset_id)
            .map(|point| point.row.clone())
            .collect())
    }

    pub fn point_count(&self) -> Result<usize, IngestError> {
        Ok(self.lock()?.points.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, IngestError> {
        self.state.lock().map_err(|e| IngestError::Transaction {
            message: format!("Memory store lock poisoned: {}", e),
        })
    }

    fn snapshot(&self) -> Result<MemoryState, IngestError> {
        Ok(self.lock()?.clone())
    }

    fn commit(&self, ops: Vec<WriteOp>) -> Result<(), IngestError> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        for op in ops {
            next.apply(op)?;
        }
        *state = next;
        Ok(())
    }
}

impl MemoryState {
    fn find_by_name(&self, name: &str) -> Option<&StoredDataset> {
        self.datasets.values().find(|dataset| dataset.name == name)
    }

    fn apply(&mut self, op: WriteOp) -> Result<(), IngestError> {
        match op {
            WriteOp::Delete { id } => {
                if self.datasets.remove(&id).is_none() {
                    return Err(IngestError::Conflict {
                        message: format!("dataset {} was removed by another transaction", id),
                    });
                }
                self.points.retain(|_, point| point.dataset_id != id);
            }
            WriteOp::Insert { dataset, points } => {
                if self.find_by_name(&dataset.name).is_some() {
                    return Err(IngestError::Conflict {
                        message: format!("dataset name '{}' already exists", dataset.name),
                    });
                }
                for (point_id, row) in points {
                    self.points.insert(
                        point_id,
                        StoredPoint {
                            dataset_id: dataset.id,
                            row,
                        },
                    );
                }
                self.datasets.insert(dataset.id, dataset);
            }
        }
        Ok(())
    }
}

struct MemoryTransaction {
    view: MemoryState,
    ops: Vec<WriteOp>,
    sequences: Arc<Sequences>,
    faults: Arc<Faults>,
}

#[async_trait]
impl DatasetTransaction for MemoryTransaction {
    async fn find_by_name(&mut self, name: &str) -> Result<Option<StoredDataset>, IngestError> {
        tokio::task::yield_now().await;
        Ok(self.view.find_by_name(name).cloned())
    }

    async fn delete_dataset(&mut self, id: i32) -> Result<(), IngestError> {
        self.view.apply(WriteOp::Delete { id })?;
        self.ops.push(WriteOp::Delete { id });
        Ok(())
    }

    async fn insert_dataset(
        &mut self,
        dataset: &NewDataset,
    ) -> Result<InsertedDataset, IngestError> {
        tokio::task::yield_now().await;
        if self.faults.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(IngestError::Transaction {
                message: "Failed to insert dataset: injected failure".to_string(),
            });
        }

        let dataset_id = self.sequences.dataset_id.fetch_add(1, Ordering::SeqCst);
        let first_point = self
            .sequences
            .point_id
            .fetch_add(dataset.points.len() as i64, Ordering::SeqCst);
        let points: Vec<(i64, DataPointRow)> = dataset
            .points
            .iter()
            .cloned()
            .enumerate()
            .map(|(offset, row)| (first_point + offset as i64, row))
            .collect();
        let point_ids = points.iter().map(|(id, _)| *id).collect();

        let stored = StoredDataset {
            id: dataset_id,
            name: dataset.name.clone(),
            aggregates: dataset.aggregates.clone(),
        };
        self.view.apply(WriteOp::Insert {
            dataset: stored.clone(),
            points: points.clone(),
        })?;
        self.ops.push(WriteOp::Insert {
            dataset: stored,
            points,
        });

        Ok(InsertedDataset {
            dataset_id,
            point_ids,
        })
    }
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn transaction<T, F>(&self, work: F) -> Result<T, IngestError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn DatasetTransaction) -> BoxFuture<'t, Result<T, IngestError>>
            + Send
            + 'static,
    {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        let mut tx = MemoryTransaction {
            view: self.snapshot()?,
            ops: Vec::new(),
            sequences: self.sequences.clone(),
            faults: self.faults.clone(),
        };

        let value = match work(&mut tx).await {
            Ok(value) => value,
            Err(e) => {
                debug!("Rolling back memory transaction: {}", e);
                return Err(e);
            }
        };

        if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(IngestError::Transaction {
                message: "Failed to commit transaction: injected failure".to_string(),
            });
        }

        self.commit(tx.ops)?;
        Ok(value)
    }
}
