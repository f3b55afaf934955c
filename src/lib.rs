pub mod aggregate;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod ingestion;
pub mod locks;
pub mod memory_store;
pub mod models;
pub mod parser;
pub mod schema;
pub mod source;
pub mod store;

pub use database::DatabaseManager;
pub use error::{IngestError, ValidationError};
pub use ingestion::IngestionCoordinator;
pub use memory_store::MemoryStore;
pub use store::{DatasetStore, DatasetTransaction};
