use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use crate::domain::{DataPointRow, DatasetAggregates, NewDataset, StoredDataset};
use crate::schema::{data_points, datasets};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = datasets)]
#[diesel(primary_key(id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DatasetModel {
    pub id: i32,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub delta_time: Decimal,
    pub avg_execution_time: Decimal,
    pub avg_value: Decimal,
    pub median_value: Decimal,
    pub max_value: Decimal,
    pub min_value: Decimal,
}

#[derive(Insertable)]
#[diesel(table_name = datasets)]
pub struct NewDatasetModel<'a> {
    pub name: &'a str,
    pub start_time: DateTime<Utc>,
    pub delta_time: Decimal,
    pub avg_execution_time: Decimal,
    pub avg_value: Decimal,
    pub median_value: Decimal,
    pub max_value: Decimal,
    pub min_value: Decimal,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = data_points)]
#[diesel(belongs_to(DatasetModel, foreign_key = dataset_id))]
#[diesel(primary_key(id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DataPointModel {
    pub id: i64,
    pub dataset_id: i32,
    pub timestamp: DateTime<Utc>,
    pub execution_time: Decimal,
    pub value: Decimal,
}

#[derive(Insertable)]
#[diesel(table_name = data_points)]
pub struct NewDataPointModel {
    pub dataset_id: i32,
    pub timestamp: DateTime<Utc>,
    pub execution_time: Decimal,
    pub value: Decimal,
}

impl<'a> From<&'a NewDataset> for NewDatasetModel<'a> {
    fn from(dataset: &'a NewDataset) -> Self {
        let aggregates = &dataset.aggregates;
        NewDatasetModel {
            name: &dataset.name,
            start_time: aggregates.start_time,
            delta_time: aggregates.delta_time,
            avg_execution_time: aggregates.avg_execution_time,
            avg_value: aggregates.avg_value,
            median_value: aggregates.median_value,
            max_value: aggregates.max_value,
            min_value: aggregates.min_value,
        }
    }
}

impl NewDataPointModel {
    pub fn new(dataset_id: i32, row: &DataPointRow) -> Self {
        Self {
            dataset_id,
            timestamp: row.timestamp,
            execution_time: row.execution_time,
            value: row.value,
        }
    }
}

impl From<DatasetModel> for StoredDataset {
    fn from(dataset: DatasetModel) -> Self {
        StoredDataset {
            id: dataset.id,
            name: dataset.name,
            aggregates: DatasetAggregates {
                start_time: dataset.start_time,
                delta_time: dataset.delta_time,
                avg_execution_time: dataset.avg_execution_time,
                avg_value: dataset.avg_value,
                median_value: dataset.median_value,
                max_value: dataset.max_value,
                min_value: dataset.min_value,
            },
        }
    }
}

impl From<DataPointModel> for DataPointRow {
    fn from(point: DataPointModel) -> Self {
        DataPointRow {
            timestamp: point.timestamp,
            execution_time: point.execution_time,
            value: point.value,
        }
    }
}
