//! Object-store table writer.
//!
//! Writes Parquet data files and Avro manifests straight into the warehouse
//! and publishes a new metadata version per batch:
//!
//! 1. Split the batch by partition tuple and write one Parquet file per tuple
//! 2. Write a manifest listing the new files
//! 3. Write a manifest list (parent's manifests for appends, plus the new one)
//! 4. Publish the next metadata version, retrying from step 2 on conflict

use crate::backend::{effective_mode, BatchCommit, TableState, TableWriteBackend};
use crate::collector::{DryRunReport, QueryCollector};
use crate::config::{CommitConfig, ObjectStoreConfig, ParquetCompression, PartitionFieldConfig, WriteMode};
use crate::error::{CommitError, SchemaError};
use crate::iceberg::commit::{calculate_backoff, CommitStats, MetadataStore};
use crate::iceberg::manifest::{
    decode_manifest_list, encode_manifest, encode_manifest_list, ManifestListEntry,
};
use crate::iceberg::model::{
    apply_commit, build_data_file, build_manifest, build_snapshot, next_snapshot_id, DataFile,
    Operation, TableMetadata,
};
use crate::iceberg::parquet::{rows_to_record_batch, write_parquet};
use crate::iceberg::partition::{PartitionSpec, Transform};
use crate::iceberg::store::{TableIdent, Warehouse};
use crate::types::{LogicalType, Row, Schema};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Write counters.
#[derive(Debug, Default)]
pub struct ObjectStoreWriterStats {
    pub files_written: AtomicU64,
    pub bytes_written: AtomicU64,
    pub rows_written: AtomicU64,
    pub snapshots_committed: AtomicU64,
}

/// Whether a table column of type `actual` can take values of `expected`.
fn accepts(actual: &LogicalType, expected: &LogicalType) -> bool {
    actual == expected
        || matches!(
            (expected, actual),
            (LogicalType::Integer, LogicalType::Long)
                | (LogicalType::Float, LogicalType::Double)
                | (LogicalType::Date, LogicalType::Timestamp)
        )
        || (expected.is_nested() && *actual == LogicalType::String)
}

/// Check that every column of `requested` exists in `table` with a type that accepts it.
pub fn check_compatibility(requested: &Schema, table: &Schema) -> Result<()> {
    for field in requested.fields() {
        match table.field_by_name(&field.name) {
            None => {
                return Err(SchemaError::Incompatible {
                    column: field.name.clone(),
                    expected: field.field_type.to_string(),
                    actual: "missing".to_string(),
                }
                .into())
            }
            Some(existing) if !accepts(&existing.field_type, &field.field_type) => {
                return Err(SchemaError::Incompatible {
                    column: field.name.clone(),
                    expected: field.field_type.to_string(),
                    actual: existing.field_type.to_string(),
                }
                .into())
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn create_table_statement(ident: &TableIdent, schema: &Schema, spec: &PartitionSpec) -> String {
    let columns = schema
        .fields()
        .iter()
        .map(|f| {
            let not_null = if f.required { " NOT NULL" } else { "" };
            format!("{} {}{}", f.name, f.field_type, not_null)
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut statement = format!("CREATE TABLE {} ({})", ident, columns);

    if !spec.is_unpartitioned() {
        let partitions = spec
            .fields
            .iter()
            .map(|pf| {
                let source = schema
                    .field_by_id(pf.source_field_id)
                    .map(|f| f.name.as_str())
                    .unwrap_or("?");
                match pf.transform {
                    Transform::Identity => source.to_string(),
                    other => format!("{}({})", other, source),
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        statement.push_str(&format!(" PARTITIONED BY ({})", partitions));
    }
    statement
}

/// Writes batches into one table of an object-store warehouse.
pub struct ObjectStoreTableWriter {
    ident: TableIdent,
    metadata: MetadataStore,
    compression: ParquetCompression,
    partition_config: Vec<PartitionFieldConfig>,
    commit_config: CommitConfig,
    collector: Option<QueryCollector>,
    /// Table state while running dry; storage is only read, never written
    dry_metadata: Option<TableMetadata>,
    schema: Option<Schema>,
    spec: PartitionSpec,
    commit_stats: CommitStats,
    stats: ObjectStoreWriterStats,
}

impl ObjectStoreTableWriter {
    pub fn new(
        warehouse: &Warehouse,
        table: &str,
        config: &ObjectStoreConfig,
        commit_config: CommitConfig,
        dry_run: bool,
    ) -> Result<Self> {
        let ident = TableIdent::parse(table)?;
        let location = warehouse.table_location(&ident);
        Ok(Self {
            ident,
            metadata: MetadataStore::new(warehouse.store(), location),
            compression: config.compression,
            partition_config: config.partition_spec.clone(),
            commit_config,
            collector: dry_run.then(QueryCollector::new),
            dry_metadata: None,
            schema: None,
            spec: PartitionSpec::unpartitioned(),
            commit_stats: CommitStats::default(),
            stats: ObjectStoreWriterStats::default(),
        })
    }

    pub fn ident(&self) -> &TableIdent {
        &self.ident
    }

    pub fn is_dry_run(&self) -> bool {
        self.collector.is_some()
    }

    pub fn stats(&self) -> &ObjectStoreWriterStats {
        &self.stats
    }

    pub fn commit_stats(&self) -> &CommitStats {
        &self.commit_stats
    }

    /// Latest table metadata as this writer sees it.
    pub async fn current_metadata(&self) -> Result<Option<TableMetadata>> {
        if self.is_dry_run() && self.dry_metadata.is_some() {
            return Ok(self.dry_metadata.clone());
        }
        self.metadata.load().await
    }

    fn table_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("write.format.default".to_string(), "parquet".to_string()),
            (
                "write.parquet.compression-codec".to_string(),
                self.compression.as_str().to_string(),
            ),
        ])
    }

    /// Create the table if absent. An existing table is dropped and
    /// recreated for an overwrite, and checked for compatibility otherwise.
    pub async fn ensure_table(&mut self, schema: &Schema, mode: WriteMode) -> Result<TableState> {
        let spec = PartitionSpec::from_config(schema, &self.partition_config)?;
        let existing = self.metadata.load().await?;

        let state = match (existing, mode) {
            (None, _) => {
                if self.create(schema, &spec).await? {
                    TableState::Created
                } else {
                    TableState::Existing
                }
            }
            (Some(_), WriteMode::Overwrite) => {
                self.drop_table().await?;
                self.create(schema, &spec).await?;
                TableState::Recreated
            }
            (Some(metadata), WriteMode::Append) => {
                self.adopt(schema, metadata)?;
                TableState::Existing
            }
        };

        info!(table = %self.ident, state = ?state, dry_run = self.is_dry_run(), "Table ready");
        Ok(state)
    }

    /// Use an existing table's schema and partition spec for writing.
    fn adopt(&mut self, schema: &Schema, metadata: TableMetadata) -> Result<()> {
        let table_schema = metadata.current_schema()?;
        check_compatibility(schema, &table_schema)?;
        self.spec = metadata.default_spec();
        self.schema = Some(table_schema);
        if self.is_dry_run() {
            self.dry_metadata = Some(metadata);
        }
        Ok(())
    }

    /// Publish the first metadata version. Returns false when another writer
    /// created the table first and it was adopted instead.
    async fn create(&mut self, schema: &Schema, spec: &PartitionSpec) -> Result<bool> {
        let metadata = TableMetadata::new(
            self.metadata.location().uri.clone(),
            schema,
            spec,
            self.table_properties(),
            Utc::now().timestamp_millis(),
        );

        if let Some(collector) = self.collector.as_mut() {
            let table_name = self.ident.to_string();
            collector.add_ddl(create_table_statement(&self.ident, schema, spec), &table_name);
            self.dry_metadata = Some(metadata);
        } else {
            match self.metadata.publish(&metadata).await {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    warn!(table = %self.ident, "Table was created concurrently, adopting it");
                    let existing = self.metadata.load().await?.ok_or_else(|| {
                        CommitError::Read("table vanished after concurrent create".into())
                    })?;
                    self.adopt(schema, existing)?;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }

        self.spec = spec.clone();
        self.schema = Some(schema.clone());
        info!(table = %self.ident, location = %self.metadata.location().uri, "Created table");
        Ok(true)
    }

    async fn drop_table(&mut self) -> Result<()> {
        if let Some(collector) = self.collector.as_mut() {
            let table_name = self.ident.to_string();
            collector.add_ddl(format!("DROP TABLE {}", self.ident), &table_name);
            return Ok(());
        }
        let removed = self.metadata.drop_table().await?;
        info!(table = %self.ident, files = removed, "Dropped table for overwrite");
        Ok(())
    }

    async fn write_data_files(&self, schema: &Schema, rows: &[Row]) -> Result<Vec<DataFile>> {
        let location = self.metadata.location();
        let mut files = Vec::new();

        for (partition_values, members) in self.spec.split_rows(schema, rows) {
            let file = build_data_file(schema, members.iter().copied(), partition_values);
            let (uri, key) = location.new_data_file();
            if self.is_dry_run() {
                files.push(file.with_file(uri, 0));
                continue;
            }

            let batch = rows_to_record_batch(schema, &members)?;
            let data = write_parquet(&batch, self.compression)?;
            let size = data.len() as u64;
            self.metadata.write_file(&key, data).await?;

            self.stats.files_written.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes_written.fetch_add(size, Ordering::Relaxed);
            debug!(path = %uri, rows = members.len(), bytes = size, "Wrote data file");
            files.push(file.with_file(uri, size));
        }
        Ok(files)
    }

    async fn read_manifest_list(&self, uri: &str) -> Result<Vec<ManifestListEntry>> {
        let key = self.metadata.location().key_for_uri(uri).ok_or_else(|| {
            CommitError::Read(format!("manifest list {} is outside the table location", uri))
        })?;
        decode_manifest_list(&self.metadata.read(&key).await?)
    }

    /// One commit attempt on top of the latest metadata.
    async fn try_commit(
        &mut self,
        schema: &Schema,
        files: &[DataFile],
        operation: Operation,
    ) -> Result<TableMetadata> {
        let current = self
            .current_metadata()
            .await?
            .ok_or_else(|| CommitError::Read(format!("table {} has no metadata", self.ident)))?;
        let parent = current.current_snapshot();
        let now = Utc::now().timestamp_millis();
        let snapshot_id = next_snapshot_id(parent, now);
        let sequence_number = current.last_sequence_number + 1;

        let location = self.metadata.location().clone();
        let (manifest_uri, manifest_key) = location.new_manifest();
        let (list_uri, list_key) = location.new_manifest_list(snapshot_id);
        let manifest = build_manifest(manifest_uri, files.to_vec(), snapshot_id);

        if !self.is_dry_run() {
            let manifest_bytes =
                encode_manifest(&manifest, &current, schema, &self.spec, sequence_number)?;
            let mut entries = match (operation, parent) {
                (Operation::Append, Some(p)) => self.read_manifest_list(&p.manifest_list).await?,
                _ => Vec::new(),
            };
            entries.push(ManifestListEntry::for_manifest(
                &manifest,
                manifest_bytes.len(),
                self.spec.spec_id,
                sequence_number,
            ));
            self.metadata
                .write_file(&manifest_key, Bytes::from(manifest_bytes))
                .await?;

            let list_bytes = encode_manifest_list(
                &entries,
                snapshot_id,
                parent.map(|p| p.snapshot_id),
                sequence_number,
            )?;
            self.metadata.write_file(&list_key, Bytes::from(list_bytes)).await?;
        }

        let snapshot = build_snapshot(
            &manifest,
            parent,
            operation,
            list_uri,
            sequence_number,
            now,
            schema.schema_id,
        );
        let next = apply_commit(&current, snapshot, &manifest)?;

        if self.is_dry_run() {
            self.dry_metadata = Some(next.clone());
        } else {
            self.metadata.publish(&next).await?;
        }
        Ok(next)
    }

    /// Commit `files` as one snapshot, retrying on version conflicts with
    /// exponential backoff. Returns the committed snapshot id.
    async fn commit_with_retry(
        &mut self,
        schema: &Schema,
        files: Vec<DataFile>,
        operation: Operation,
    ) -> Result<i64> {
        let mut retries = 0;

        loop {
            self.commit_stats
                .commits_attempted
                .fetch_add(1, Ordering::Relaxed);

            match self.try_commit(schema, &files, operation).await {
                Ok(metadata) => {
                    self.commit_stats
                        .commits_succeeded
                        .fetch_add(1, Ordering::Relaxed);
                    if retries > 0 {
                        info!(table = %self.ident, retries, "Commit succeeded after retries");
                    }
                    return metadata.current_snapshot_id.ok_or_else(|| {
                        CommitError::Publish("committed metadata has no current snapshot".into())
                            .into()
                    });
                }
                Err(e) if e.is_retryable() => {
                    self.commit_stats
                        .version_conflicts
                        .fetch_add(1, Ordering::Relaxed);
                    retries += 1;
                    if retries > self.commit_config.max_retries {
                        self.commit_stats
                            .commits_failed
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(table = %self.ident, retries, "Version conflict: max retries exceeded");
                        return Err(e);
                    }

                    let delay = calculate_backoff(&self.commit_config, retries);
                    warn!(
                        table = %self.ident,
                        retry = retries,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Version conflict, retrying commit"
                    );
                    self.commit_stats.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.commit_stats
                        .commits_failed
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
    }

    /// Write `rows` as new data files and commit them as one snapshot.
    pub async fn commit_batch(&mut self, rows: &[Row], operation: Operation) -> Result<BatchCommit> {
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| SchemaError::Missing("ensure_table was not called".into()))?;
        if rows.is_empty() {
            return Ok(BatchCommit::default());
        }

        let files = self.write_data_files(&schema, rows).await?;
        let units = files.len();
        let snapshot_id = self.commit_with_retry(&schema, files, operation).await?;

        if let Some(collector) = self.collector.as_mut() {
            let table_name = self.ident.to_string();
            collector.add_dml(
                format!(
                    "Write {} rows to table {} in mode: {}",
                    rows.len(),
                    self.ident,
                    operation.as_str()
                ),
                rows.len(),
                &table_name,
            );
        }

        self.stats
            .rows_written
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        self.stats
            .snapshots_committed
            .fetch_add(1, Ordering::Relaxed);

        Ok(BatchCommit {
            rows: rows.len(),
            units,
            snapshot_id: Some(snapshot_id),
        })
    }
}

#[async_trait]
impl TableWriteBackend for ObjectStoreTableWriter {
    fn name(&self) -> &'static str {
        "object_store"
    }

    fn table_name(&self) -> String {
        self.ident.to_string()
    }

    async fn ensure_table(&mut self, schema: &Schema, mode: WriteMode) -> Result<TableState> {
        ObjectStoreTableWriter::ensure_table(self, schema, mode).await
    }

    async fn write_batch(
        &mut self,
        rows: &[Row],
        mode: WriteMode,
        batch_index: usize,
    ) -> Result<BatchCommit> {
        let start = Instant::now();
        let operation = match effective_mode(mode, batch_index) {
            WriteMode::Append => Operation::Append,
            WriteMode::Overwrite => Operation::Overwrite,
        };
        let commit = self.commit_batch(rows, operation).await?;

        info!(
            table = %self.ident,
            batch = batch_index,
            rows = commit.rows,
            files = commit.units,
            snapshot_id = ?commit.snapshot_id,
            operation = operation.as_str(),
            dry_run = self.is_dry_run(),
            duration_ms = start.elapsed().as_millis(),
            "Batch committed"
        );
        Ok(commit)
    }

    fn dry_run_report(&self) -> Option<DryRunReport> {
        self.collector.as_ref().map(|c| c.report().clone())
    }
}
