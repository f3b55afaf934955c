use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool},
        AsyncDieselConnectionManager,
    },
    AsyncConnection, AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::domain::{DataPointRow, InsertedDataset, NewDataset, StoredDataset};
use crate::error::IngestError;
use crate::models::*;
use crate::schema::*;
use crate::store::{DatasetStore, DatasetTransaction};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Rows per multi-row insert; four bind parameters each keeps a batch well
/// under the PostgreSQL limit of 65535.
const POINT_BATCH_SIZE: usize = 5_000;

#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<AsyncPgConnection>,
}

impl DatabaseManager {
    pub async fn new(database_url: &str, pool_size: usize) -> Result<Self, IngestError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config)
            .max_size(pool_size)
            .build()
            .map_err(|e| IngestError::Config {
                message: format!("Failed to create database pool: {}", e),
            })?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self, database_url: &str) -> Result<(), IngestError> {
        let database_url = database_url.to_string();

        // diesel_migrations only drives synchronous connections
        tokio::task::spawn_blocking(move || {
            use diesel::PgConnection;

            let mut connection =
                PgConnection::establish(&database_url).map_err(|e| IngestError::Config {
                    message: format!("Failed to establish connection for migrations: {}", e),
                })?;

            let applied = connection
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| IngestError::Config {
                    message: format!("Failed to run migrations: {}", e),
                })?;

            info!("Applied {} pending migrations", applied.len());
            Ok(())
        })
        .await
        .map_err(|e| IngestError::Config {
            message: format!("Migration task failed: {}", e),
        })?
    }

    async fn connection(&self) -> Result<Object<AsyncPgConnection>, IngestError> {
        self.pool
            .get()
            .await
            .map_err(|e| IngestError::Transaction {
                message: format!("Failed to get database connection: {}", e),
            })
    }

    pub async fn get_dataset(
        &self,
        dataset_name: &str,
    ) -> Result<Option<StoredDataset>, IngestError> {
        let mut conn = self.connection().await?;
        let dataset = datasets::table
            .filter(datasets::name.eq(dataset_name))
            .select(DatasetModel::as_select())
            .first::<DatasetModel>(&mut conn)
            .await
            .optional()?;

        Ok(dataset.map(|d| d.into()))
    }

    /// Data points of a dataset ordered by timestamp.
    pub async fn load_points(&self, dataset_id: i32) -> Result<Vec<DataPointRow>, IngestError> {
        let mut conn = self.connection().await?;
        let points = data_points::table
            .filter(data_points::dataset_id.eq(dataset_id))
            .order((data_points::timestamp.asc(), data_points::id.asc()))
            .select(DataPointModel::as_select())
            .get_results::<DataPointModel>(&mut conn)
            .await?;

        Ok(points.into_iter().map(|p| p.into()).collect())
    }
}

#[async_trait]
impl DatasetTransaction for AsyncPgConnection {
    async fn find_by_name(&mut self, name: &str) -> Result<Option<StoredDataset>, IngestError> {
        let dataset = datasets::table
            .filter(datasets::name.eq(name))
            .select(DatasetModel::as_select())
            .first::<DatasetModel>(self)
            .await
            .optional()?;

        Ok(dataset.map(|d| d.into()))
    }

    async fn delete_dataset(&mut self, id: i32) -> Result<(), IngestError> {
        let points = diesel::delete(data_points::table.filter(data_points::dataset_id.eq(id)))
            .execute(self)
            .await?;
        diesel::delete(datasets::table.find(id)).execute(self).await?;

        debug!("Deleted dataset {} with {} data points", id, points);
        Ok(())
    }

    async fn insert_dataset(
        &mut self,
        dataset: &NewDataset,
    ) -> Result<InsertedDataset, IngestError> {
        let dataset_id = diesel::insert_into(datasets::table)
            .values(NewDatasetModel::from(dataset))
            .returning(datasets::id)
            .get_result::<i32>(self)
            .await?;

        let mut point_ids = Vec::with_capacity(dataset.points.len());
        for batch in dataset.points.chunks(POINT_BATCH_SIZE) {
            let rows: Vec<NewDataPointModel> = batch
                .iter()
                .map(|row| NewDataPointModel::new(dataset_id, row))
                .collect();

            let ids = diesel::insert_into(data_points::table)
                .values(&rows)
                .returning(data_points::id)
                .get_results::<i64>(self)
                .await?;
            point_ids.extend(ids);
        }

        debug!(
            "Inserted dataset '{}' as {} with {} data points",
            dataset.name,
            dataset_id,
            point_ids.len()
        );
        Ok(InsertedDataset {
            dataset_id,
            point_ids,
        })
    }
}

#[async_trait]
impl DatasetStore for DatabaseManager {
    async fn transaction<T, F>(&self, work: F) -> Result<T, IngestError>
    where
        T: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn DatasetTransaction) -> BoxFuture<'t, Result<T, IngestError>>
            + Send
            + 'static,
    {
        let mut pooled = self.connection().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<T, IngestError, _>(|conn| {
            Box::pin(async move {
                let tx: &mut dyn DatasetTransaction = conn;
                work(tx).await
            })
        })
        .await
    }
}
