//! Storage port for datasets.
//!
//! The ingestion coordinator only ever writes through these traits; the
//! PostgreSQL and in-memory stores implement them.

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::domain::{InsertedDataset, NewDataset, StoredDataset};
use crate::error::IngestError;

/// Operations available inside an open storage transaction.
#[async_trait]
pub trait DatasetTransaction: Send {
    async fn find_by_name(&mut self, name: &str) -> Result<Option<StoredDataset>, IngestError>;

    /// Removes a dataset together with every data point it owns.
    async fn delete_dataset(&mut self, id: i32) -> Result<(), IngestError>;

    async fn insert_dataset(&mut self, dataset: &NewDataset)
        -> Result<InsertedDataset, IngestError>;
}

#[async_trait]
pub trait DatasetStore: Send + Sync + 'static {
    /// Runs `work` in a single transaction: committed when it returns `Ok`,
    /// rolled back when it returns `Err` or the commit itself fails.
    async fn transaction<T, F>(&self, work: F) -> Result<T, IngestError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn DatasetTransaction) -> BoxFuture<'t, Result<T, IngestError>>
            + Send
            + 'static;
}
