//! SQL table write backend.
//!
//! Turns row batches into packed `INSERT` statements against a
//! `catalog.schema.table` target.
//!
//! ## Write Flow
//!
//! 1. `ensure_table`: create the table if absent, otherwise check that its
//!    columns accept the schema; for an overwrite, delete existing rows once
//! 2. `write_batch`: fill the column type cache from the engine catalog,
//!    encode each row, group rows into `INSERT` statements sized from the
//!    average encoded row, and hand them to the [`StatementBatcher`]
//!
//! In dry-run mode catalog reads still reach the engine but every DDL and
//! DML statement is recorded in a [`QueryCollector`] instead of executed.

use crate::backend::{effective_mode, BatchCommit, TableState, TableWriteBackend};
use crate::collector::{DryRunReport, QueryCollector, QueryMetadata};
use crate::config::{SqlConfig, WriteMode};
use crate::error::{SchemaError, WriteError};
use crate::sql::batcher::{Statement, StatementBatcher};
use crate::sql::encoder::{encode, quote_identifier, quote_string};
use crate::sql::engine::SqlEngine;
use crate::sql::schema_cache::TargetSchemaCache;
use crate::sql::types::SqlType;
use crate::types::{sanitize_column_name, Row, Schema, Value};
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Three-part SQL table identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTableName {
    pub catalog: String,
    pub schema: String,
    pub table: String,
}

impl SqlTableName {
    /// Resolve `catalog.schema.table`, `schema.table` or `table`, taking the
    /// missing parts from configuration.
    pub fn resolve(name: &str, config: &SqlConfig) -> Result<Self> {
        let parts: Vec<&str> = name.trim().split('.').map(str::trim).collect();
        let (catalog, schema, table) = match parts.as_slice() {
            [catalog, schema, table] => (*catalog, *schema, *table),
            [schema, table] => (config.catalog.as_str(), *schema, *table),
            [table] => (config.catalog.as_str(), config.schema.as_str(), *table),
            _ => {
                return Err(Error::Config(format!(
                    "Invalid table name '{}': expected catalog.schema.table",
                    name
                )))
            }
        };

        if catalog.is_empty() || schema.is_empty() || table.is_empty() {
            return Err(Error::Config(format!(
                "Table name '{}' does not resolve to catalog.schema.table",
                name
            )));
        }

        Ok(Self {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }
}

impl fmt::Display for SqlTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

/// Result of the best-effort overwrite truncate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncateOutcome {
    Truncated,
    /// The delete failed; existing rows stay and writes continue
    Skipped { reason: String },
}

/// SQL writer statistics.
#[derive(Debug, Default)]
pub struct SqlWriterStats {
    pub statements_executed: AtomicU64,
    pub rows_written: AtomicU64,
    pub batches_written: AtomicU64,
}

/// Writes row batches to one table through a [`SqlEngine`].
pub struct SqlTableWriter {
    engine: Arc<dyn SqlEngine>,
    table: SqlTableName,
    max_query_size: usize,
    max_rows_per_statement: usize,
    delimiter: String,
    table_format: Option<String>,
    cache: TargetSchemaCache,
    /// Present in dry-run mode
    collector: Option<QueryCollector>,
    truncate_done: bool,
    stats: SqlWriterStats,
}

impl SqlTableWriter {
    pub fn new(
        engine: Arc<dyn SqlEngine>,
        table: SqlTableName,
        config: &SqlConfig,
        dry_run: bool,
    ) -> Self {
        Self {
            engine,
            table,
            max_query_size: config.max_query_size,
            max_rows_per_statement: config.max_rows_per_statement.max(1),
            delimiter: config.delimiter.clone(),
            table_format: config.table_format.clone(),
            cache: TargetSchemaCache::new(),
            collector: dry_run.then(QueryCollector::new),
            truncate_done: false,
            stats: SqlWriterStats::default(),
        }
    }

    pub fn table(&self) -> &SqlTableName {
        &self.table
    }

    pub fn is_dry_run(&self) -> bool {
        self.collector.is_some()
    }

    pub fn schema_cache(&self) -> &TargetSchemaCache {
        &self.cache
    }

    pub fn stats(&self) -> &SqlWriterStats {
        &self.stats
    }

    pub fn invalidate_schema_cache(&mut self) {
        self.cache.invalidate();
        debug!(table = %self.table, "Schema cache invalidated");
    }

    /// Whether the target table exists in the engine catalog.
    pub async fn table_exists(&self) -> Result<bool> {
        let sql = format!(
            "SELECT table_name FROM {}.information_schema.tables WHERE table_schema = {} AND table_name = {}",
            self.table.catalog,
            quote_string(&self.table.schema),
            quote_string(&self.table.table)
        );
        Ok(!self.engine.execute(&sql).await?.is_empty())
    }

    /// Column names and types of the target table, in ordinal order.
    pub async fn fetch_table_columns(&self) -> Result<Vec<(String, SqlType)>> {
        let sql = format!(
            "SELECT column_name, data_type FROM {}.information_schema.columns \
             WHERE table_catalog = {} AND table_schema = {} AND table_name = {} \
             ORDER BY ordinal_position",
            self.table.catalog,
            quote_string(&self.table.catalog),
            quote_string(&self.table.schema),
            quote_string(&self.table.table)
        );
        let output = self.engine.execute(&sql).await?;

        let columns = (0..output.rows.len())
            .filter_map(|i| {
                let name = output.get_str(i, "column_name")?;
                let ty = output.get_str(i, "data_type")?;
                Some((name.to_string(), SqlType::parse(ty)))
            })
            .collect();
        Ok(columns)
    }

    /// `CREATE TABLE` statement for `schema`.
    pub fn create_table_sql(&self, schema: &Schema) -> String {
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| {
                format!(
                    "{} {}",
                    quote_identifier(&sanitize_column_name(&f.name)),
                    SqlType::from_logical(&f.field_type)
                )
            })
            .collect();

        let mut sql = format!("CREATE TABLE {} ({})", self.table, columns.join(", "));
        if let Some(format) = &self.table_format {
            sql.push_str(&format!(" WITH (format = {})", quote_string(format)));
        }
        sql
    }

    /// Check that every schema column exists in `columns` with an accepting type.
    pub fn check_compatibility(schema: &Schema, columns: &[(String, SqlType)]) -> Result<()> {
        for field in schema.fields() {
            let name = sanitize_column_name(&field.name);
            let declared = SqlType::from_logical(&field.field_type);
            let existing = columns
                .iter()
                .find(|(col, _)| col.eq_ignore_ascii_case(&name))
                .map(|(_, ty)| ty);

            match existing {
                Some(actual) if actual.accepts(&declared) => {}
                Some(actual) => {
                    return Err(SchemaError::Incompatible {
                        column: name,
                        expected: declared.to_string(),
                        actual: actual.to_string(),
                    }
                    .into())
                }
                None => {
                    return Err(SchemaError::Incompatible {
                        column: name,
                        expected: declared.to_string(),
                        actual: "missing".to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(())
    }

    /// Run or record one DDL statement.
    async fn run_ddl(&mut self, sql: String) -> Result<()> {
        match &mut self.collector {
            Some(collector) => {
                info!(sql = %sql, "[DRY RUN] Would execute DDL");
                collector.add_ddl(sql, &self.table.to_string());
                Ok(())
            }
            None => {
                self.engine.execute(&sql).await?;
                self.stats.statements_executed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Delete all rows for an overwrite. Failure is reported, not raised.
    pub async fn truncate(&mut self) -> TruncateOutcome {
        let sql = format!("DELETE FROM {}", self.table);
        let outcome = match self.run_ddl(sql).await {
            Ok(()) => {
                info!(table = %self.table, "Truncated table for overwrite");
                TruncateOutcome::Truncated
            }
            Err(e) => {
                warn!(
                    table = %self.table,
                    error = %e,
                    "Failed to truncate table for overwrite, continuing with insert"
                );
                TruncateOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        self.truncate_done = true;
        self.invalidate_schema_cache();
        outcome
    }

    async fn ensure_table_inner(&mut self, schema: &Schema, mode: WriteMode) -> Result<TableState> {
        if !self.table_exists().await? {
            let sql = self.create_table_sql(schema);
            self.run_ddl(sql).await?;
            self.invalidate_schema_cache();
            // A new table has nothing to remove for an overwrite.
            self.truncate_done = true;

            if self.is_dry_run() {
                // Nothing to read back from the catalog.
                self.cache.populate(
                    schema
                        .fields()
                        .iter()
                        .map(|f| {
                            (
                                sanitize_column_name(&f.name),
                                SqlType::from_logical(&f.field_type),
                            )
                        })
                        .collect(),
                );
            }
            info!(table = %self.table, columns = schema.len(), "Created table");
            return Ok(TableState::Created);
        }

        let columns = self.fetch_table_columns().await?;
        Self::check_compatibility(schema, &columns)?;
        self.cache.populate(columns);

        if mode == WriteMode::Overwrite && !self.truncate_done {
            return Ok(match self.truncate().await {
                TruncateOutcome::Truncated => TableState::Truncated,
                TruncateOutcome::Skipped { reason } => TableState::TruncateSkipped { reason },
            });
        }

        Ok(TableState::Existing)
    }

    /// Create the table if absent; for an overwrite of an existing table,
    /// delete its rows once.
    pub async fn ensure_table(&mut self, schema: &Schema, mode: WriteMode) -> Result<TableState> {
        let result = self.ensure_table_inner(schema, mode).await;
        if result.is_err() && mode == WriteMode::Overwrite {
            self.invalidate_schema_cache();
        }
        result
    }

    /// Rows per `INSERT` so a statement stays within the query size budget.
    fn rows_per_statement(&self, prefix_len: usize, encoded_rows: &[String]) -> usize {
        if encoded_rows.is_empty() {
            return self.max_rows_per_statement;
        }
        let total: usize = encoded_rows.iter().map(String::len).sum();
        let avg_row = total as f64 / encoded_rows.len() as f64;
        let budget = self.max_query_size.saturating_sub(prefix_len) as f64;
        let fit = (budget / (avg_row + 2.0)) as usize;
        fit.clamp(1, self.max_rows_per_statement)
    }

    /// Encode rows into `INSERT` statements, each tagged with its row count.
    pub fn build_insert_statements(&self, schema: &Schema, rows: &[Row]) -> Vec<Statement> {
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| sanitize_column_name(&f.name))
            .collect();
        let targets: Vec<Option<&SqlType>> =
            columns.iter().map(|c| self.cache.column_type(c)).collect();

        let encoded: Vec<String> = rows
            .iter()
            .map(|row| {
                let values: Vec<String> = schema
                    .fields()
                    .iter()
                    .zip(&targets)
                    .map(|(field, target)| {
                        let value = row.get(&field.name).unwrap_or(&Value::Null);
                        encode(value, *target)
                    })
                    .collect();
                format!("({})", values.join(", "))
            })
            .collect();

        let column_list: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
        let prefix = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.table,
            column_list.join(", ")
        );
        let per_statement = self.rows_per_statement(prefix.len(), &encoded);
        debug!(
            rows = encoded.len(),
            rows_per_statement = per_statement,
            "Planned INSERT statements"
        );

        encoded
            .chunks(per_statement)
            .map(|chunk| Statement::new(format!("{}{}", prefix, chunk.join(", ")), chunk.len()))
            .collect()
    }

    async fn write_rows(&mut self, schema: &Schema, rows: &[Row]) -> Result<usize> {
        if !self.cache.is_populated() {
            let columns = self.fetch_table_columns().await?;
            if columns.is_empty() {
                warn!(table = %self.table, "Catalog returned no columns, inferring literal types");
            }
            self.cache.populate(columns);
        }

        let statements = self.build_insert_statements(schema, rows);
        let count = statements.len();

        let mut batcher = StatementBatcher::new(self.max_query_size)
            .with_delimiter(self.delimiter.clone())
            .with_max_statements(self.engine.max_statements_per_request())
            .with_dry_run(self.is_dry_run());

        let engine = Arc::clone(&self.engine);
        let executor = move |sql: String| {
            let engine = Arc::clone(&engine);
            async move { engine.execute(&sql).await.map(|_| ()) }
        };

        let metadata = QueryMetadata::dml(self.table.to_string());
        let processed = batcher
            .process(statements, executor, self.collector.as_mut(), Some(&metadata))
            .await
            .map_err(|e| match e {
                Error::Write(_) => e,
                other => Error::Write(WriteError::Statement(other.to_string())),
            })?;

        if !self.is_dry_run() {
            self.stats
                .statements_executed
                .fetch_add(processed as u64, Ordering::Relaxed);
        }
        Ok(count)
    }
}

/// [`TableWriteBackend`] over a [`SqlTableWriter`], remembering the schema
/// passed to `ensure_table` for column ordering.
pub struct SqlBackend {
    writer: SqlTableWriter,
    schema: Option<Schema>,
}

impl SqlBackend {
    pub fn new(writer: SqlTableWriter) -> Self {
        Self {
            writer,
            schema: None,
        }
    }

    pub fn writer(&self) -> &SqlTableWriter {
        &self.writer
    }
}

#[async_trait]
impl TableWriteBackend for SqlBackend {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn table_name(&self) -> String {
        self.writer.table.to_string()
    }

    async fn ensure_table(&mut self, schema: &Schema, mode: WriteMode) -> Result<TableState> {
        let state = self.writer.ensure_table(schema, mode).await?;
        self.schema = Some(schema.clone());
        Ok(state)
    }

    async fn write_batch(
        &mut self,
        rows: &[Row],
        mode: WriteMode,
        batch_index: usize,
    ) -> Result<BatchCommit> {
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| SchemaError::Missing("ensure_table was not called".into()))?;
        let mode = effective_mode(mode, batch_index);

        if rows.is_empty() {
            return Ok(BatchCommit::default());
        }

        let start = Instant::now();
        let writer = &mut self.writer;

        if mode == WriteMode::Overwrite && !writer.truncate_done && writer.table_exists().await? {
            writer.truncate().await;
        }

        let result = writer.write_rows(&schema, rows).await;
        let statements = match result {
            Ok(n) => n,
            Err(e) => {
                if mode == WriteMode::Overwrite {
                    writer.invalidate_schema_cache();
                }
                return Err(e);
            }
        };

        writer.stats.batches_written.fetch_add(1, Ordering::Relaxed);
        writer
            .stats
            .rows_written
            .fetch_add(rows.len() as u64, Ordering::Relaxed);

        info!(
            table = %writer.table,
            batch = batch_index,
            rows = rows.len(),
            statements,
            mode = %mode,
            dry_run = writer.is_dry_run(),
            duration_ms = start.elapsed().as_millis(),
            "Batch written"
        );

        Ok(BatchCommit {
            rows: rows.len(),
            units: statements,
            snapshot_id: None,
        })
    }

    fn dry_run_report(&self) -> Option<DryRunReport> {
        self.writer.collector.as_ref().map(|c| c.report().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::engine::QueryOutput;
    use crate::types::{Field, LogicalType};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Engine double: answers catalog queries from a fixed table layout and
    /// records everything else.
    #[derive(Default)]
    struct MockEngine {
        columns: Mutex<Option<Vec<(String, String)>>>,
        executed: Mutex<Vec<String>>,
        fail_on: Option<String>,
        statements_per_request: Option<usize>,
    }

    impl MockEngine {
        fn with_table(columns: &[(&str, &str)]) -> Self {
            Self {
                columns: Mutex::new(Some(
                    columns
                        .iter()
                        .map(|(n, t)| (n.to_string(), t.to_string()))
                        .collect(),
                )),
                ..Default::default()
            }
        }

        fn failing_on(mut self, fragment: &str) -> Self {
            self.fail_on = Some(fragment.to_string());
            self
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().clone()
        }
    }

    #[async_trait]
    impl SqlEngine for MockEngine {
        async fn execute(&self, sql: &str) -> Result<QueryOutput> {
            if sql.contains("information_schema.tables") {
                let exists = self.columns.lock().is_some();
                return Ok(QueryOutput {
                    columns: vec!["table_name".into()],
                    rows: if exists { vec![vec![json!("orders")]] } else { vec![] },
                });
            }
            if sql.contains("information_schema.columns") {
                let rows = self
                    .columns
                    .lock()
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(n, t)| vec![json!(n), json!(t)])
                    .collect();
                return Ok(QueryOutput {
                    columns: vec!["column_name".into(), "data_type".into()],
                    rows,
                });
            }

            if let Some(fragment) = &self.fail_on {
                if sql.contains(fragment.as_str()) {
                    return Err(Error::Write(WriteError::Statement(
                        "Access Denied: Cannot delete from table".into(),
                    )));
                }
            }

            if sql.starts_with("CREATE TABLE") {
                *self.columns.lock() = Some(vec![
                    ("id".into(), "bigint".into()),
                    ("customer_name".into(), "varchar".into()),
                ]);
            }
            self.executed.lock().push(sql.to_string());
            Ok(QueryOutput::default())
        }

        fn max_statements_per_request(&self) -> Option<usize> {
            self.statements_per_request
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new(1, "id", LogicalType::Long).required(),
            Field::new(2, "customer name", LogicalType::String),
        ])
        .unwrap()
    }

    fn rows(range: std::ops::Range<i64>) -> Vec<Row> {
        range
            .map(|i| {
                Row::from([
                    ("id".to_string(), Value::Integer(i)),
                    ("customer_name".to_string(), Value::String(format!("c'{}", i))),
                ])
            })
            .collect()
    }

    fn sql_config() -> SqlConfig {
        SqlConfig {
            host: "localhost".into(),
            catalog: "iceberg".into(),
            schema: "sales".into(),
            ..Default::default()
        }
    }

    fn backend(engine: Arc<MockEngine>, config: &SqlConfig, dry_run: bool) -> SqlBackend {
        let table = SqlTableName::resolve("orders", config).unwrap();
        SqlBackend::new(SqlTableWriter::new(engine, table, config, dry_run))
    }

    #[test]
    fn test_resolve_table_name() {
        let config = sql_config();
        assert_eq!(
            SqlTableName::resolve("a.b.c", &config).unwrap().to_string(),
            "a.b.c"
        );
        assert_eq!(
            SqlTableName::resolve("raw.events", &config).unwrap().to_string(),
            "iceberg.raw.events"
        );
        assert_eq!(
            SqlTableName::resolve("orders", &config).unwrap().to_string(),
            "iceberg.sales.orders"
        );
        assert!(SqlTableName::resolve("a.b.c.d", &config).is_err());

        let no_catalog = SqlConfig {
            catalog: String::new(),
            ..sql_config()
        };
        assert!(SqlTableName::resolve("sales.orders", &no_catalog).is_err());
    }

    #[test]
    fn test_create_table_sql() {
        let engine = Arc::new(MockEngine::default());
        let config = sql_config();
        let writer = SqlTableWriter::new(
            engine,
            SqlTableName::resolve("orders", &config).unwrap(),
            &config,
            false,
        );
        assert_eq!(
            writer.create_table_sql(&schema()),
            "CREATE TABLE iceberg.sales.orders (\"id\" BIGINT, \"customer_name\" VARCHAR) WITH (format = 'ICEBERG')"
        );
    }

    #[test]
    fn test_compatibility_check() {
        let existing = vec![
            ("id".to_string(), SqlType::Integer),
            ("customer_name".to_string(), SqlType::Char),
        ];
        // INTEGER takes BIGINT, CHAR takes VARCHAR
        assert!(SqlTableWriter::check_compatibility(&schema(), &existing).is_ok());

        let wrong_type = vec![
            ("id".to_string(), SqlType::Date),
            ("customer_name".to_string(), SqlType::Varchar),
        ];
        let err = SqlTableWriter::check_compatibility(&schema(), &wrong_type).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::Incompatible { ref column, .. }) if column == "id"
        ));

        let missing = vec![("id".to_string(), SqlType::BigInt)];
        assert!(SqlTableWriter::check_compatibility(&schema(), &missing).is_err());
    }

    #[tokio::test]
    async fn test_creates_missing_table_and_inserts() {
        let engine = Arc::new(MockEngine::default());
        let mut backend = backend(Arc::clone(&engine), &sql_config(), false);

        let state = backend
            .ensure_table(&schema(), WriteMode::Append)
            .await
            .unwrap();
        assert_eq!(state, TableState::Created);
        assert!(!backend.writer().schema_cache().is_populated());

        let commit = backend
            .write_batch(&rows(0..3), WriteMode::Append, 0)
            .await
            .unwrap();
        assert_eq!(commit.rows, 3);
        assert_eq!(commit.units, 1);

        let executed = engine.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].starts_with("CREATE TABLE iceberg.sales.orders"));
        assert_eq!(
            executed[1],
            "INSERT INTO iceberg.sales.orders (\"id\", \"customer_name\") VALUES \
             (0, 'c''0'), (1, 'c''1'), (2, 'c''2')"
        );
        assert!(backend.writer().schema_cache().is_populated());
    }

    #[tokio::test]
    async fn test_overwrite_truncates_exactly_once() {
        let engine = Arc::new(MockEngine::with_table(&[
            ("id", "bigint"),
            ("customer_name", "varchar"),
        ]));
        let mut backend = backend(Arc::clone(&engine), &sql_config(), false);

        let state = backend
            .ensure_table(&schema(), WriteMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(state, TableState::Truncated);

        backend
            .write_batch(&rows(0..5), WriteMode::Overwrite, 0)
            .await
            .unwrap();
        backend
            .write_batch(&rows(5..10), WriteMode::Overwrite, 1)
            .await
            .unwrap();

        let executed = engine.executed();
        let deletes = executed
            .iter()
            .filter(|s| s.starts_with("DELETE FROM"))
            .count();
        assert_eq!(deletes, 1);
        assert_eq!(executed[0], "DELETE FROM iceberg.sales.orders");
        assert_eq!(
            executed.iter().filter(|s| s.starts_with("INSERT")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_overwrite_of_new_table_never_deletes() {
        let engine = Arc::new(MockEngine::default());
        let mut backend = backend(Arc::clone(&engine), &sql_config(), false);

        let state = backend
            .ensure_table(&schema(), WriteMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(state, TableState::Created);
        for (i, range) in [0..3, 3..6].into_iter().enumerate() {
            backend
                .write_batch(&rows(range), WriteMode::Overwrite, i)
                .await
                .unwrap();
        }

        let executed = engine.executed();
        assert!(executed[0].starts_with("CREATE TABLE"));
        assert!(!executed.iter().any(|s| s.starts_with("DELETE FROM")));
        assert_eq!(
            executed.iter().filter(|s| s.starts_with("INSERT")).count(),
            2
        );

        // A dry run of the same write records the same DDL
        let engine = Arc::new(MockEngine::default());
        let mut backend = self::backend(Arc::clone(&engine), &sql_config(), true);
        backend
            .ensure_table(&schema(), WriteMode::Overwrite)
            .await
            .unwrap();
        backend
            .write_batch(&rows(0..3), WriteMode::Overwrite, 0)
            .await
            .unwrap();
        let report = backend.dry_run_report().unwrap();
        assert_eq!(report.ddl_statements.len(), 1);
        assert!(report.ddl_statements[0].query.starts_with("CREATE TABLE"));
    }

    #[tokio::test]
    async fn test_truncate_failure_is_best_effort() {
        let engine = Arc::new(
            MockEngine::with_table(&[("id", "bigint"), ("customer_name", "varchar")])
                .failing_on("DELETE FROM"),
        );
        let mut backend = backend(Arc::clone(&engine), &sql_config(), false);

        let state = backend
            .ensure_table(&schema(), WriteMode::Overwrite)
            .await
            .unwrap();
        assert!(matches!(state, TableState::TruncateSkipped { ref reason } if reason.contains("Access Denied")));
        assert!(!backend.writer().schema_cache().is_populated());

        let commit = backend
            .write_batch(&rows(0..2), WriteMode::Overwrite, 0)
            .await
            .unwrap();
        assert_eq!(commit.rows, 2);
        assert_eq!(engine.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_incompatible_existing_table() {
        let engine = Arc::new(MockEngine::with_table(&[
            ("id", "date"),
            ("customer_name", "varchar"),
        ]));
        let mut backend = backend(Arc::clone(&engine), &sql_config(), false);

        let err = backend
            .ensure_table(&schema(), WriteMode::Overwrite)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::Incompatible { .. })));
        assert!(!backend.writer().schema_cache().is_populated());
        assert!(engine.executed().is_empty());
    }

    #[tokio::test]
    async fn test_statements_split_by_query_size() {
        let engine = Arc::new(MockEngine {
            statements_per_request: Some(1),
            ..MockEngine::with_table(&[("id", "bigint"), ("customer_name", "varchar")])
        });
        let config = SqlConfig {
            max_query_size: 200,
            ..sql_config()
        };
        let mut backend = backend(Arc::clone(&engine), &config, false);
        backend
            .ensure_table(&schema(), WriteMode::Append)
            .await
            .unwrap();

        let commit = backend
            .write_batch(&rows(0..20), WriteMode::Append, 0)
            .await
            .unwrap();
        assert!(commit.units > 1);

        let executed = engine.executed();
        assert_eq!(executed.len(), commit.units);
        for sql in &executed {
            assert!(sql.len() <= 200, "statement over budget: {}", sql.len());
        }
        let values: usize = executed.iter().map(|s| s.matches("'c''").count()).sum();
        assert_eq!(values, 20);
    }

    #[tokio::test]
    async fn test_engine_error_fails_batch() {
        let engine = Arc::new(
            MockEngine::with_table(&[("id", "bigint"), ("customer_name", "varchar")])
                .failing_on("INSERT"),
        );
        let mut backend = backend(Arc::clone(&engine), &sql_config(), false);
        backend
            .ensure_table(&schema(), WriteMode::Append)
            .await
            .unwrap();

        let err = backend
            .write_batch(&rows(0..2), WriteMode::Append, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Write(WriteError::Statement(_))));
    }

    #[tokio::test]
    async fn test_write_without_ensure_table() {
        let engine = Arc::new(MockEngine::default());
        let mut backend = backend(engine, &sql_config(), false);
        let err = backend
            .write_batch(&rows(0..1), WriteMode::Append, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::Missing(_))));
    }

    #[tokio::test]
    async fn test_dry_run_records_without_executing() {
        let engine = Arc::new(MockEngine::with_table(&[
            ("id", "bigint"),
            ("customer_name", "varchar"),
        ]));
        let mut backend = backend(Arc::clone(&engine), &sql_config(), true);

        backend
            .ensure_table(&schema(), WriteMode::Overwrite)
            .await
            .unwrap();
        backend
            .write_batch(&rows(0..4), WriteMode::Overwrite, 0)
            .await
            .unwrap();
        backend
            .write_batch(&rows(4..6), WriteMode::Overwrite, 1)
            .await
            .unwrap();

        assert!(engine.executed().is_empty());

        let report = backend.dry_run_report().unwrap();
        assert_eq!(report.ddl_statements.len(), 1);
        assert_eq!(report.ddl_statements[0].query, "DELETE FROM iceberg.sales.orders");
        assert_eq!(report.stats.tables_modified, 1);
        assert_eq!(report.dml_statements.len(), 2);
        assert_eq!(report.stats.total_rows, 6);
        assert_eq!(report.dml_statements[1].row_count, 2);
        assert_eq!(report.dml_statements[0].table_name, "iceberg.sales.orders");
    }

    #[tokio::test]
    async fn test_dry_run_for_missing_table_uses_schema_types() {
        let engine = Arc::new(MockEngine::default());
        let mut backend = backend(Arc::clone(&engine), &sql_config(), true);

        let state = backend
            .ensure_table(&schema(), WriteMode::Append)
            .await
            .unwrap();
        assert_eq!(state, TableState::Created);
        assert_eq!(
            backend.writer().schema_cache().column_type("customer_name"),
            Some(&SqlType::Varchar)
        );

        backend
            .write_batch(&rows(0..1), WriteMode::Append, 0)
            .await
            .unwrap();
        let report = backend.dry_run_report().unwrap();
        assert_eq!(report.stats.tables_created, 1);
        assert_eq!(report.dml_statements.len(), 1);
        assert!(engine.executed().is_empty());
    }
}
