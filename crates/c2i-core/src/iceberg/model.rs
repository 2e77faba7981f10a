//! Table format entities and the pure functions that build them.
//!
//! Nothing here performs I/O: the object-store writer encodes and uploads
//! what these functions return, and publishes the metadata produced by
//! [`apply_commit`].

use crate::error::{CommitError, SchemaError};
use crate::iceberg::encoding::OrderedValue;
use crate::iceberg::partition::PartitionSpec;
use crate::types::{Field, LogicalType, Row, Schema, Value};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub const FORMAT_VERSION: i32 = 2;

/// Physical file format recorded for data files.
pub const PARQUET_FORMAT: &str = "PARQUET";

/// One physical data file and its column statistics, keyed by field id.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub path: String,
    pub format: String,
    pub record_count: i64,
    pub size_bytes: i64,
    /// Estimated uncompressed value bytes per column
    pub column_sizes: BTreeMap<i32, i64>,
    pub value_counts: BTreeMap<i32, i64>,
    pub null_counts: BTreeMap<i32, i64>,
    pub lower_bounds: BTreeMap<i32, Vec<u8>>,
    pub upper_bounds: BTreeMap<i32, Vec<u8>>,
    /// Partition tuple in partition spec field order
    pub partition_values: Vec<Value>,
}

impl DataFile {
    /// Attach the physical location and size once the file is written.
    pub fn with_file(mut self, path: impl Into<String>, size_bytes: u64) -> Self {
        self.path = path.into();
        self.size_bytes = size_bytes as i64;
        self
    }
}

fn estimated_size(value: &Value, ty: &LogicalType) -> i64 {
    match OrderedValue::from_value(value, ty) {
        Some(v) => v.to_bytes().len() as i64,
        None => match value {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            other => other.to_text().len() as i64,
        },
    }
}

/// Compute record count and per-column statistics for rows of one file.
///
/// Lower and upper bounds are only recorded for ordered column types, and
/// only from values that fit the column type.
pub fn build_data_file<'a, I>(schema: &Schema, rows: I, partition_values: Vec<Value>) -> DataFile
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut record_count = 0i64;
    let mut column_sizes = BTreeMap::new();
    let mut value_counts = BTreeMap::new();
    let mut null_counts = BTreeMap::new();
    let mut mins: HashMap<i32, OrderedValue> = HashMap::new();
    let mut maxs: HashMap<i32, OrderedValue> = HashMap::new();

    for row in rows {
        record_count += 1;
        for field in schema.fields() {
            let value = row.get(&field.name).unwrap_or(&Value::Null);
            *value_counts.entry(field.id).or_insert(0) += 1;
            *null_counts.entry(field.id).or_insert(0) += value.is_null() as i64;
            *column_sizes.entry(field.id).or_insert(0) += estimated_size(value, &field.field_type);

            if !field.field_type.is_ordered() {
                continue;
            }
            if let Some(ordered) = OrderedValue::from_value(value, &field.field_type) {
                match mins.get(&field.id) {
                    Some(min) if *min <= ordered => {}
                    _ => {
                        mins.insert(field.id, ordered.clone());
                    }
                }
                match maxs.get(&field.id) {
                    Some(max) if *max >= ordered => {}
                    _ => {
                        maxs.insert(field.id, ordered);
                    }
                }
            }
        }
    }

    DataFile {
        path: String::new(),
        format: PARQUET_FORMAT.to_string(),
        record_count,
        size_bytes: 0,
        column_sizes,
        value_counts,
        null_counts,
        lower_bounds: mins.into_iter().map(|(id, v)| (id, v.to_bytes())).collect(),
        upper_bounds: maxs.into_iter().map(|(id, v)| (id, v.to_bytes())).collect(),
        partition_values,
    }
}

/// Data files added by one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub path: String,
    pub snapshot_id: i64,
    pub added_files_count: i32,
    pub added_rows_count: i64,
    pub entries: Vec<DataFile>,
}

pub fn build_manifest(path: impl Into<String>, data_files: Vec<DataFile>, snapshot_id: i64) -> Manifest {
    Manifest {
        path: path.into(),
        snapshot_id,
        added_files_count: data_files.len() as i32,
        added_rows_count: data_files.iter().map(|f| f.record_count).sum(),
        entries: data_files,
    }
}

/// Snapshot operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Append,
    Overwrite,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Append => "append",
            Operation::Overwrite => "overwrite",
        }
    }
}

/// Snapshot summary. Counts are written as strings, as the format requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub operation: Operation,
    #[serde(rename = "added-records", with = "string_count")]
    pub added_rows: i64,
    #[serde(rename = "added-data-files", with = "string_count")]
    pub added_files: i64,
    #[serde(rename = "total-records", with = "string_count")]
    pub total_rows: i64,
    #[serde(rename = "total-data-files", with = "string_count")]
    pub total_files: i64,
}

mod string_count {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An immutable table version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    #[serde(
        rename = "parent-snapshot-id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_snapshot_id: Option<i64>,
    #[serde(rename = "sequence-number", default)]
    pub sequence_number: i64,
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
    #[serde(rename = "manifest-list")]
    pub manifest_list: String,
    pub summary: SnapshotSummary,
    #[serde(rename = "schema-id", default)]
    pub schema_id: i32,
}

/// Id for the next snapshot: wall-clock millis, bumped past the parent so
/// ids strictly increase along the chain.
pub fn next_snapshot_id(parent: Option<&Snapshot>, now_ms: i64) -> i64 {
    match parent {
        Some(p) => now_ms.max(p.snapshot_id + 1),
        None => now_ms,
    }
}

/// Build the snapshot that adds `manifest` on top of `parent`.
///
/// The snapshot id is the manifest's, allocated with [`next_snapshot_id`].
/// Appends accumulate the parent's totals; an overwrite's totals are its
/// own additions.
pub fn build_snapshot(
    manifest: &Manifest,
    parent: Option<&Snapshot>,
    operation: Operation,
    manifest_list: impl Into<String>,
    sequence_number: i64,
    timestamp_ms: i64,
    schema_id: i32,
) -> Snapshot {
    let added_rows = manifest.added_rows_count;
    let added_files = manifest.added_files_count as i64;
    let (total_rows, total_files) = match (operation, parent) {
        (Operation::Append, Some(p)) => (
            p.summary.total_rows + added_rows,
            p.summary.total_files + added_files,
        ),
        _ => (added_rows, added_files),
    };

    Snapshot {
        snapshot_id: manifest.snapshot_id,
        parent_snapshot_id: parent.map(|p| p.snapshot_id),
        sequence_number,
        timestamp_ms,
        manifest_list: manifest_list.into(),
        summary: SnapshotSummary {
            operation,
            added_rows,
            added_files,
            total_rows,
            total_files,
        },
        schema_id,
    }
}

/// Schema as stored in table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDoc {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "schema-id")]
    pub schema_id: i32,
    pub fields: Vec<FieldDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDoc {
    pub id: i32,
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl From<&Schema> for SchemaDoc {
    fn from(schema: &Schema) -> Self {
        Self {
            kind: "struct".to_string(),
            schema_id: schema.schema_id,
            fields: schema
                .fields()
                .iter()
                .map(|f| FieldDoc {
                    id: f.id,
                    name: f.name.clone(),
                    required: f.required,
                    field_type: f.field_type.to_string(),
                    doc: f.doc.clone(),
                })
                .collect(),
        }
    }
}

impl SchemaDoc {
    /// Back to a [`Schema`]. Nested columns come back as strings.
    pub fn to_schema(&self) -> Result<Schema> {
        let fields = self
            .fields
            .iter()
            .map(|f| {
                let mut field = Field::new(f.id, f.name.clone(), LogicalType::parse(&f.field_type)?);
                field.required = f.required;
                field.doc = f.doc.clone();
                Ok(field)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut schema = Schema::new(fields)?;
        schema.schema_id = self.schema_id;
        Ok(schema)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLogEntry {
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOrder {
    #[serde(rename = "order-id")]
    pub order_id: i32,
    pub fields: Vec<serde_json::Value>,
}

/// Root metadata document of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    #[serde(rename = "format-version")]
    pub format_version: i32,
    #[serde(rename = "table-uuid")]
    pub table_uuid: String,
    pub location: String,
    #[serde(rename = "last-sequence-number")]
    pub last_sequence_number: i64,
    #[serde(rename = "last-updated-ms")]
    pub last_updated_ms: i64,
    #[serde(rename = "last-column-id")]
    pub last_column_id: i32,
    pub schemas: Vec<SchemaDoc>,
    #[serde(rename = "current-schema-id")]
    pub current_schema_id: i32,
    #[serde(rename = "partition-specs")]
    pub partition_specs: Vec<PartitionSpec>,
    #[serde(rename = "default-spec-id")]
    pub default_spec_id: i32,
    #[serde(rename = "last-partition-id")]
    pub last_partition_id: i32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(rename = "current-snapshot-id", default)]
    pub current_snapshot_id: Option<i64>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(rename = "snapshot-log", default)]
    pub snapshot_log: Vec<SnapshotLogEntry>,
    #[serde(rename = "sort-orders")]
    pub sort_orders: Vec<SortOrder>,
    #[serde(rename = "default-sort-order-id")]
    pub default_sort_order_id: i32,
}

impl TableMetadata {
    /// Metadata of a new, empty table.
    pub fn new(
        location: impl Into<String>,
        schema: &Schema,
        spec: &PartitionSpec,
        properties: BTreeMap<String, String>,
        now_ms: i64,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            table_uuid: Uuid::new_v4().to_string(),
            location: location.into(),
            last_sequence_number: 0,
            last_updated_ms: now_ms,
            last_column_id: schema.last_column_id(),
            schemas: vec![SchemaDoc::from(schema)],
            current_schema_id: schema.schema_id,
            partition_specs: vec![spec.clone()],
            default_spec_id: spec.spec_id,
            last_partition_id: spec.last_field_id(),
            properties,
            current_snapshot_id: None,
            snapshots: Vec::new(),
            snapshot_log: Vec::new(),
            sort_orders: vec![SortOrder {
                order_id: 0,
                fields: Vec::new(),
            }],
            default_sort_order_id: 0,
        }
    }

    /// Version of this document: 1 at creation, plus one per commit.
    pub fn version(&self) -> i64 {
        self.last_sequence_number + 1
    }

    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        let id = self.current_snapshot_id?;
        self.snapshots.iter().find(|s| s.snapshot_id == id)
    }

    pub fn current_schema(&self) -> Result<Schema> {
        self.schemas
            .iter()
            .find(|s| s.schema_id == self.current_schema_id)
            .ok_or_else(|| {
                SchemaError::Missing(format!(
                    "current schema {} not found in table metadata",
                    self.current_schema_id
                ))
            })?
            .to_schema()
    }

    pub fn default_spec(&self) -> PartitionSpec {
        self.partition_specs
            .iter()
            .find(|s| s.spec_id == self.default_spec_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| CommitError::Read(format!("invalid table metadata: {}", e)).into())
    }
}

/// Return a new metadata document with `snapshot` appended and current.
///
/// Fails with a version conflict when `snapshot` was not built on top of the
/// document's current snapshot, or when it does not carry `manifest`.
pub fn apply_commit(
    metadata: &TableMetadata,
    snapshot: Snapshot,
    manifest: &Manifest,
) -> Result<TableMetadata> {
    if snapshot.parent_snapshot_id != metadata.current_snapshot_id {
        return Err(CommitError::VersionConflict {
            expected: snapshot.parent_snapshot_id.unwrap_or(-1),
            actual: metadata.current_snapshot_id.unwrap_or(-1),
        }
        .into());
    }
    if manifest.snapshot_id != snapshot.snapshot_id {
        return Err(CommitError::Manifest(format!(
            "manifest belongs to snapshot {}, not {}",
            manifest.snapshot_id, snapshot.snapshot_id
        ))
        .into());
    }

    let mut next = metadata.clone();
    next.last_sequence_number = snapshot.sequence_number.max(metadata.last_sequence_number + 1);
    next.last_updated_ms = snapshot.timestamp_ms.max(metadata.last_updated_ms);
    next.current_snapshot_id = Some(snapshot.snapshot_id);
    next.snapshot_log.push(SnapshotLogEntry {
        snapshot_id: snapshot.snapshot_id,
        timestamp_ms: snapshot.timestamp_ms,
    });
    next.snapshots.push(snapshot);
    Ok(next)
}
