//! Error types for c2i core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for c2i operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for c2i.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or contradictory connection or write parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQL engine or object store unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema missing or incompatible with an existing table
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Statement or commit execution failure
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Object-store metadata publish failure
    #[error("Metadata commit error: {0}")]
    MetadataCommit(#[from] CommitError),

    /// Row shape does not match schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conversion stopped by its cancellation flag
    #[error("Conversion cancelled")]
    Cancelled,

    /// Failure annotated with the conversion stage it happened in
    #[error("{stage} failed{}: {source}", batch.map(|b| format!(" at batch {}", b)).unwrap_or_default())]
    Stage {
        stage: String,
        batch: Option<usize>,
        #[source]
        source: Box<Error>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Schema-specific errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// No schema supplied where one is required
    #[error("Schema is missing: {0}")]
    Missing(String),

    /// Two fields share an id
    #[error("Duplicate field id {0}")]
    DuplicateFieldId(i32),

    /// Two fields share a name
    #[error("Duplicate field name '{0}'")]
    DuplicateFieldName(String),

    /// Partition field references a field id not present in the schema
    #[error("Partition field '{name}' references unknown source field id {source_field_id}")]
    UnknownSourceField { name: String, source_field_id: i32 },

    /// Partition field references a column name not present in the schema
    #[error("Partition column '{0}' not found in schema")]
    UnknownColumn(String),

    /// Transform is malformed or cannot be applied to the column type
    #[error("Invalid partition transform: {0}")]
    InvalidTransform(String),

    /// Existing table column type cannot accept the schema's type
    #[error("Column '{column}' is incompatible: table has {actual}, schema requires {expected}")]
    Incompatible {
        column: String,
        expected: String,
        actual: String,
    },
}

/// Write-path errors.
#[derive(Error, Debug)]
pub enum WriteError {
    /// The SQL engine rejected a statement
    #[error("Statement failed: {0}")]
    Statement(String),

    /// Encoding rows into a physical data file failed
    #[error("Data file encoding failed: {0}")]
    DataFile(String),

    /// Upload to object storage failed
    #[error("File upload failed: {0}")]
    Upload(String),
}

/// Metadata commit errors.
#[derive(Error, Debug)]
pub enum CommitError {
    /// Another writer published a newer metadata version first
    #[error("Version conflict: expected metadata version {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    /// Writing the metadata document failed
    #[error("Metadata publish failed: {0}")]
    Publish(String),

    /// Existing metadata could not be read or decoded
    #[error("Metadata read failed: {0}")]
    Read(String),

    /// Manifest or manifest list encoding failed
    #[error("Manifest encoding failed: {0}")]
    Manifest(String),
}

impl Error {
    /// Wrap an error with the stage and optional batch index it occurred in.
    pub fn at_stage(self, stage: impl Into<String>, batch: Option<usize>) -> Self {
        Error::Stage {
            stage: stage.into(),
            batch,
            source: Box::new(self),
        }
    }

    /// Whether retrying the failed operation can succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::MetadataCommit(CommitError::VersionConflict { .. }) => true,
            Error::Stage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<apache_avro::Error> for Error {
    fn from(err: apache_avro::Error) -> Self {
        Error::MetadataCommit(CommitError::Manifest(err.to_string()))
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Error::Write(WriteError::DataFile(err.to_string()))
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(err: arrow::error::ArrowError) -> Self {
        Error::Write(WriteError::DataFile(err.to_string()))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let schema_err = SchemaError::UnknownSourceField {
            name: "ts_day".into(),
            source_field_id: 42,
        };
        let err: Error = schema_err.into();
        assert!(err.to_string().contains("unknown source field id 42"));
    }

    #[test]
    fn test_stage_context() {
        let err = Error::Write(WriteError::Statement("permission denied".into()))
            .at_stage("Writing", Some(3));
        assert_eq!(
            err.to_string(),
            "Writing failed at batch 3: Write error: Statement failed: permission denied"
        );

        let err = Error::Connection("refused".into()).at_stage("EnsuringTable", None);
        assert_eq!(
            err.to_string(),
            "EnsuringTable failed: Connection error: refused"
        );
    }

    #[test]
    fn test_version_conflict_is_retryable() {
        let err: Error = CommitError::VersionConflict {
            expected: 4,
            actual: 5,
        }
        .into();
        assert!(err.to_string().contains("Version conflict"));
        assert!(err.is_retryable());
        assert!(err.at_stage("Writing", Some(1)).is_retryable());

        let err: Error = CommitError::Publish("timeout".into()).into();
        assert!(!err.is_retryable());
    }
}
