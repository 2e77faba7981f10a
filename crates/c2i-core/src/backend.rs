//! Table write backend trait shared by the SQL and object-store writers.

use crate::collector::DryRunReport;
use crate::config::WriteMode;
use crate::types::{Row, Schema};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;

/// What `ensure_table` found or did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TableState {
    /// Table did not exist and was created
    Created,
    /// Table existed and is written as-is
    Existing,
    /// Existing rows were removed for an overwrite
    Truncated,
    /// Overwrite was requested but removing existing rows failed; writes continue
    TruncateSkipped { reason: String },
    /// Table was dropped and created again for an overwrite
    Recreated,
}

/// Result of writing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchCommit {
    pub rows: usize,
    /// SQL statements produced, or data files written
    pub units: usize,
    /// Snapshot committed by the object-store backend
    pub snapshot_id: Option<i64>,
}

/// A backend that can create a table and write row batches into it.
///
/// Batches of one logical write must be passed in order with increasing
/// `batch_index`, starting at zero.
#[async_trait]
pub trait TableWriteBackend: Send {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Fully qualified target table name.
    fn table_name(&self) -> String;

    /// Create the table if absent and prepare it for `mode`.
    async fn ensure_table(&mut self, schema: &Schema, mode: WriteMode) -> Result<TableState>;

    /// Write one batch of rows.
    async fn write_batch(
        &mut self,
        rows: &[Row],
        mode: WriteMode,
        batch_index: usize,
    ) -> Result<BatchCommit>;

    /// Report of recorded operations, when running dry.
    fn dry_run_report(&self) -> Option<DryRunReport>;
}

/// Mode a batch is written with: only the first batch of a write may overwrite.
pub fn effective_mode(requested: WriteMode, batch_index: usize) -> WriteMode {
    if batch_index == 0 {
        requested
    } else {
        WriteMode::Append
    }
}
