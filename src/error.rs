use diesel::result::DatabaseErrorKind;
use thiserror::Error;

/// Why an input file was rejected. Every row-level variant carries the
/// 1-based index of the offending record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("failed to parse date at row {row}")]
    InvalidDate { row: usize },

    #[error("failed to parse execution time at row {row}")]
    InvalidExecutionTime { row: usize },

    #[error("failed to parse value at row {row}")]
    InvalidValue { row: usize },

    #[error("invalid date at row {row}")]
    DateOutOfRange { row: usize },

    #[error("execution time negative at row {row}")]
    NegativeExecutionTime { row: usize },

    #[error("value negative at row {row}")]
    NegativeValue { row: usize },

    #[error("decimal out of range at row {row}")]
    DecimalOutOfRange { row: usize },

    #[error("expected 3 fields at row {row}, found {found}")]
    FieldCount { row: usize, found: usize },

    #[error("malformed record at row {row}: {message}")]
    MalformedRecord { row: usize, message: String },

    #[error("file must not contain more than {limit} rows")]
    TooManyRows { row: usize, limit: usize },

    #[error("file must not be empty")]
    EmptyFile,
}

impl ValidationError {
    pub fn row(&self) -> Option<usize> {
        match self {
            ValidationError::InvalidDate { row }
            | ValidationError::InvalidExecutionTime { row }
            | ValidationError::InvalidValue { row }
            | ValidationError::DateOutOfRange { row }
            | ValidationError::NegativeExecutionTime { row }
            | ValidationError::NegativeValue { row }
            | ValidationError::DecimalOutOfRange { row }
            | ValidationError::FieldCount { row, .. }
            | ValidationError::MalformedRecord { row, .. }
            | ValidationError::TooManyRows { row, .. } => Some(*row),
            ValidationError::EmptyFile => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid dataset name: {message}")]
    InvalidName { message: String },

    #[error("Dataset transaction failed: {message}")]
    Transaction { message: String },

    #[error("Concurrent ingestion conflict: {message}")]
    Conflict { message: String },

    #[error("Source error: {message}")]
    Source { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl IngestError {
    /// Failures caused by the submitted input rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::Validation(_) | IngestError::InvalidName { .. }
        )
    }

    /// A racing ingestion of the same name won; the whole ingestion may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Conflict { .. })
    }
}

impl From<diesel::result::Error> for IngestError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                IngestError::Conflict {
                    message: info.message().to_string(),
                }
            }
            other => IngestError::Transaction {
                message: format!("Database error: {}", other),
            },
        }
    }
}

impl From<object_store::Error> for IngestError {
    fn from(err: object_store::Error) -> Self {
        IngestError::Source {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_index_is_reported_for_row_errors() {
        assert_eq!(ValidationError::NegativeValue { row: 7 }.row(), Some(7));
        assert_eq!(ValidationError::EmptyFile.row(), None);
        assert_eq!(
            ValidationError::DateOutOfRange { row: 3 }.to_string(),
            "invalid date at row 3"
        );
    }

    #[test]
    fn test_unique_violation_maps_to_conflict() {
        let err = diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value violates unique constraint".to_string()),
        );
        let mapped = IngestError::from(err);
        assert!(mapped.is_retryable());
        assert!(!mapped.is_client_error());
    }

    #[test]
    fn test_other_database_errors_map_to_transaction() {
        let mapped = IngestError::from(diesel::result::Error::RollbackTransaction);
        assert!(matches!(mapped, IngestError::Transaction { .. }));
        assert!(!mapped.is_retryable());
    }

    #[test]
    fn test_validation_errors_are_client_errors() {
        let mapped = IngestError::from(ValidationError::EmptyFile);
        assert!(mapped.is_client_error());
        assert_eq!(mapped.to_string(), "Validation failed: file must not be empty");
    }
}
