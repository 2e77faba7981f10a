//! SQL engine write path.
//!
//! - [`batcher`]: byte-budget statement packing
//! - [`encoder`]: row values to SQL literals
//! - [`types`]: engine column types and compatibility
//! - [`engine`] / [`trino`]: statement execution
//! - [`writer`]: the table write backend

pub mod batcher;
pub mod encoder;
pub mod engine;
pub mod schema_cache;
pub mod trino;
pub mod types;
pub mod writer;

pub use batcher::{Statement, StatementBatcher, DEFAULT_DELIMITER};
pub use engine::{QueryOutput, SqlEngine};
pub use schema_cache::TargetSchemaCache;
pub use trino::TrinoClient;
pub use types::SqlType;
pub use writer::{SqlBackend, SqlTableName, SqlTableWriter, TruncateOutcome};
