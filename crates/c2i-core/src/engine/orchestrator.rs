//! Conversion orchestration.
//!
//! Drives one conversion through its states:
//!
//! ```text
//! Pending → EnsuringTable → Writing { batch, of } → Completed
//!                 │                   │
//!                 └───────────────────┴──────────────→ Failed
//! ```
//!
//! A failed batch stops the conversion. Batches committed before it stay
//! committed.

use crate::backend::{TableState, TableWriteBackend};
use crate::collector::DryRunReport;
use crate::config::{Config, ConnectionType, WriteMode};
use crate::engine::metrics::ConversionMetrics;
use crate::engine::progress::{ProgressCallback, ProgressTracker};
use crate::iceberg::{ObjectStoreTableWriter, Warehouse};
use crate::source::RowSource;
use crate::sql::{SqlBackend, SqlTableName, SqlTableWriter, TrinoClient};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Where a conversion is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ConversionState {
    Pending,
    EnsuringTable,
    /// Writing batch `batch` (1-based) of `of`, when the row count is known
    Writing { batch: usize, of: Option<usize> },
    Completed,
    Failed,
}

/// Outcome of a conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub success: bool,
    pub rows_processed: usize,
    pub error: Option<String>,
    /// Seconds
    pub duration: f64,
    pub state: ConversionState,
    pub table_state: Option<TableState>,
    pub metrics: ConversionMetrics,
    pub dry_run_report: Option<DryRunReport>,
    /// Last snapshot committed by the object-store backend
    pub snapshot_id: Option<i64>,
}

/// Build the backend selected by `config.writer.connection`.
pub fn build_backend(config: &Config) -> Result<Box<dyn TableWriteBackend>> {
    let writer = &config.writer;
    match writer.connection {
        ConnectionType::Sql => {
            let engine = Arc::new(TrinoClient::new(&config.sql)?);
            let table = SqlTableName::resolve(&writer.table, &config.sql)?;
            let table_writer = SqlTableWriter::new(engine, table, &config.sql, writer.dry_run);
            Ok(Box::new(SqlBackend::new(table_writer)))
        }
        ConnectionType::ObjectStore => {
            let warehouse = Warehouse::from_config(&config.object_store)?;
            Ok(Box::new(ObjectStoreTableWriter::new(
                &warehouse,
                &writer.table,
                &config.object_store,
                config.commit.clone(),
                writer.dry_run,
            )?))
        }
    }
}

/// Runs a row source through a table write backend in fixed-size batches.
pub struct ConversionOrchestrator {
    backend: Box<dyn TableWriteBackend>,
    mode: WriteMode,
    batch_size: usize,
    progress: Option<ProgressCallback>,
    cancel: Option<Arc<AtomicBool>>,
    state: ConversionState,
}

impl ConversionOrchestrator {
    pub fn new(backend: Box<dyn TableWriteBackend>, mode: WriteMode, batch_size: usize) -> Self {
        Self {
            backend,
            mode,
            batch_size: batch_size.max(1),
            progress: None,
            cancel: None,
            state: ConversionState::Pending,
        }
    }

    /// Orchestrator for the backend and write settings in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            build_backend(config)?,
            config.writer.mode,
            config.writer.batch_size,
        ))
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Stop before the next batch once `flag` is set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> &ConversionState {
        &self.state
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }

    /// Run the conversion. Failures are reported in the result rather than
    /// returned, together with the metrics gathered up to that point.
    pub async fn run(&mut self, source: &mut dyn RowSource) -> ConversionResult {
        let start = Instant::now();
        let mut metrics = ConversionMetrics::default();
        let mut table_state = None;
        let mut snapshot_id = None;

        info!(
            backend = self.backend.name(),
            table = %self.backend.table_name(),
            mode = %self.mode,
            batch_size = self.batch_size,
            "Starting conversion"
        );

        let outcome = self
            .drive(source, &mut metrics, &mut table_state, &mut snapshot_id)
            .await;
        let elapsed = start.elapsed();
        metrics.finish(elapsed);

        let error = match outcome {
            Ok(()) => {
                self.state = ConversionState::Completed;
                info!(
                    table = %self.backend.table_name(),
                    rows = metrics.total_rows,
                    batches = metrics.total_batches,
                    rows_per_sec = metrics.processing_rate,
                    duration_ms = elapsed.as_millis(),
                    "Conversion completed"
                );
                None
            }
            Err(e) => {
                self.state = ConversionState::Failed;
                error!(
                    table = %self.backend.table_name(),
                    rows = metrics.total_rows,
                    error = %e,
                    "Conversion failed"
                );
                Some(e.to_string())
            }
        };

        ConversionResult {
            success: error.is_none(),
            rows_processed: metrics.total_rows,
            error,
            duration: elapsed.as_secs_f64(),
            state: self.state.clone(),
            table_state,
            dry_run_report: self.backend.dry_run_report(),
            snapshot_id,
            metrics,
        }
    }

    async fn drive(
        &mut self,
        source: &mut dyn RowSource,
        metrics: &mut ConversionMetrics,
        table_state: &mut Option<TableState>,
        snapshot_id: &mut Option<i64>,
    ) -> Result<()> {
        let schema = source.schema().clone();
        if schema.is_empty() {
            return Err(crate::error::SchemaError::Missing("schema has no columns".into())
                .into());
        }

        self.state = ConversionState::EnsuringTable;
        let ensure_start = Instant::now();
        let state = self
            .backend
            .ensure_table(&schema, self.mode)
            .await
            .map_err(|e| e.at_stage("ensure_table", None))?;
        debug!(state = ?state, duration_ms = ensure_start.elapsed().as_millis(), "Table ensured");
        *table_state = Some(state);

        let total = source.total_rows();
        let total_batches = total.map(|t| t.div_ceil(self.batch_size));
        let mut progress = ProgressTracker::new(total, self.progress.take());
        progress.update(0);

        let mut batch_index = 0;
        loop {
            if self.is_cancelled() {
                return Err(Error::Cancelled.at_stage("write", Some(batch_index)));
            }

            let rows = source
                .next_batch(self.batch_size)
                .await
                .map_err(|e| e.at_stage("read", Some(batch_index)))?;
            if rows.is_empty() {
                break;
            }

            self.state = ConversionState::Writing {
                batch: batch_index + 1,
                of: total_batches,
            };
            let batch_start = Instant::now();
            let commit = self
                .backend
                .write_batch(&rows, self.mode, batch_index)
                .await
                .map_err(|e| e.at_stage("write", Some(batch_index)))?;
            let batch_time: Duration = batch_start.elapsed();

            metrics.record_batch(rows.len(), batch_time);
            if commit.snapshot_id.is_some() {
                *snapshot_id = commit.snapshot_id;
            }
            progress.update(metrics.total_rows);
            debug!(
                batch = batch_index,
                rows = rows.len(),
                duration_ms = batch_time.as_millis(),
                "Batch done"
            );
            batch_index += 1;
        }

        progress.finish();
        Ok(())
    }
}
