//! C2I Core - batched row conversion into Iceberg tables
//!
//! This library writes validated rows into an Iceberg table through one of
//! two backends:
//!
//! - A SQL engine (Trino), with byte-budgeted multi-row INSERT statements
//! - Direct object storage, writing Parquet data files, Avro manifests and
//!   versioned table metadata with optimistic concurrency
//!
//! Both backends support append and overwrite modes and a dry run that
//! records the statements and commits that would have been executed.

pub mod backend;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod iceberg;
pub mod source;
pub mod sql;
pub mod types;

// Re-export commonly used types
pub use backend::{BatchCommit, TableState, TableWriteBackend};
pub use config::{Config, ConnectionType, WriteMode};
pub use engine::{ConversionOrchestrator, ConversionResult, ConversionState};
pub use error::{CommitError, SchemaError, WriteError};
pub use error::{Error, Result};
pub use source::{JsonLinesSource, RowSource, VecRowSource};
pub use types::{Field, LogicalType, Row, Schema, Value};
