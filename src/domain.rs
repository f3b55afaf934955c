use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One validated record of an input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPointRow {
    pub timestamp: DateTime<Utc>,
    pub execution_time: Decimal,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetAggregates {
    pub start_time: DateTime<Utc>,
    /// Seconds between the earliest and latest timestamp.
    pub delta_time: Decimal,
    pub avg_execution_time: Decimal,
    pub avg_value: Decimal,
    pub median_value: Decimal,
    pub max_value: Decimal,
    pub min_value: Decimal,
}

/// A fully validated dataset ready to be written: header plus owned rows.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub name: String,
    pub aggregates: DatasetAggregates,
    pub points: Vec<DataPointRow>,
}

/// Dataset header as persisted by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDataset {
    pub id: i32,
    pub name: String,
    pub aggregates: DatasetAggregates,
}

/// Identifiers generated by a store for an inserted dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedDataset {
    pub dataset_id: i32,
    pub point_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub dataset_id: i32,
    pub name: String,
    pub row_count: usize,
    /// Id of the dataset this ingestion superseded.
    pub replaced: Option<i32>,
    pub aggregates: DatasetAggregates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Idle,
    Parsing,
    Aggregating,
    Transacting,
    Committed,
    RolledBack,
    Rejected,
}

impl IngestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestPhase::Idle => "idle",
            IngestPhase::Parsing => "parsing",
            IngestPhase::Aggregating => "aggregating",
            IngestPhase::Transacting => "transacting",
            IngestPhase::Committed => "committed",
            IngestPhase::RolledBack => "rolled_back",
            IngestPhase::Rejected => "rejected",
        }
    }

    /// The phase an ingestion ends in when it fails while in `self`.
    pub fn on_failure(&self) -> IngestPhase {
        match self {
            IngestPhase::Transacting => IngestPhase::RolledBack,
            _ => IngestPhase::Rejected,
        }
    }
}

impl std::fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
