//! Avro encoding of manifests and manifest lists.

use crate::error::CommitError;
use crate::iceberg::model::{DataFile, Manifest, TableMetadata};
use crate::iceberg::partition::PartitionSpec;
use crate::types::{LogicalType, Schema, Value};
use crate::Result;
use apache_avro::types::{Record, Value as AvroValue};
use apache_avro::{Reader as AvroReader, Schema as AvroSchema, Writer as AvroWriter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Entry status for files added by the manifest's snapshot.
pub const STATUS_ADDED: i32 = 1;

static MANIFEST_LIST_SCHEMA: OnceLock<AvroSchema> = OnceLock::new();

const MANIFEST_LIST_SCHEMA_JSON: &str = r#"
{
    "type": "record",
    "name": "manifest_file",
    "fields": [
        {"name": "manifest_path", "type": "string", "field-id": 500},
        {"name": "manifest_length", "type": "long", "field-id": 501},
        {"name": "partition_spec_id", "type": "int", "field-id": 502},
        {"name": "content", "type": "int", "field-id": 517},
        {"name": "sequence_number", "type": "long", "field-id": 515},
        {"name": "min_sequence_number", "type": "long", "field-id": 516},
        {"name": "added_snapshot_id", "type": "long", "field-id": 503},
        {"name": "added_files_count", "type": "int", "field-id": 504},
        {"name": "existing_files_count", "type": "int", "field-id": 505},
        {"name": "deleted_files_count", "type": "int", "field-id": 506},
        {"name": "added_rows_count", "type": "long", "field-id": 512},
        {"name": "existing_rows_count", "type": "long", "field-id": 513},
        {"name": "deleted_rows_count", "type": "long", "field-id": 514}
    ]
}
"#;

fn manifest_list_schema() -> Result<&'static AvroSchema> {
    if let Some(schema) = MANIFEST_LIST_SCHEMA.get() {
        return Ok(schema);
    }
    let parsed = AvroSchema::parse_str(MANIFEST_LIST_SCHEMA_JSON)?;
    Ok(MANIFEST_LIST_SCHEMA.get_or_init(|| parsed))
}

/// One manifest referenced by a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestListEntry {
    pub manifest_path: String,
    pub manifest_length: i64,
    pub partition_spec_id: i32,
    pub content: i32,
    pub sequence_number: i64,
    pub min_sequence_number: i64,
    pub added_snapshot_id: i64,
    pub added_files_count: i32,
    pub existing_files_count: i32,
    pub deleted_files_count: i32,
    pub added_rows_count: i64,
    pub existing_rows_count: i64,
    pub deleted_rows_count: i64,
}

impl ManifestListEntry {
    pub fn for_manifest(
        manifest: &Manifest,
        manifest_length: usize,
        partition_spec_id: i32,
        sequence_number: i64,
    ) -> Self {
        Self {
            manifest_path: manifest.path.clone(),
            manifest_length: manifest_length as i64,
            partition_spec_id,
            content: 0,
            sequence_number,
            min_sequence_number: sequence_number,
            added_snapshot_id: manifest.snapshot_id,
            added_files_count: manifest.added_files_count,
            existing_files_count: 0,
            deleted_files_count: 0,
            added_rows_count: manifest.added_rows_count,
            existing_rows_count: 0,
            deleted_rows_count: 0,
        }
    }
}

fn avro_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn avro_primitive(ty: &LogicalType) -> &'static str {
    match ty {
        LogicalType::Boolean => "boolean",
        LogicalType::Integer | LogicalType::Date => "int",
        LogicalType::Long | LogicalType::Timestamp => "long",
        LogicalType::Float => "float",
        LogicalType::Double => "double",
        _ => "string",
    }
}

/// Result types of the partition spec's fields, in field order.
fn partition_types(schema: &Schema, spec: &PartitionSpec) -> Vec<LogicalType> {
    spec.fields
        .iter()
        .map(|pf| {
            schema
                .field_by_id(pf.source_field_id)
                .map(|f| pf.transform.result_type(&f.field_type))
                .unwrap_or(LogicalType::String)
        })
        .collect()
}

fn manifest_entry_schema(schema: &Schema, spec: &PartitionSpec) -> Result<AvroSchema> {
    let partition_fields: Vec<serde_json::Value> = spec
        .fields
        .iter()
        .zip(partition_types(schema, spec))
        .map(|(pf, ty)| {
            json!({
                "name": avro_name(&pf.name),
                "type": ["null", avro_primitive(&ty)],
                "default": null,
                "field-id": pf.field_id,
            })
        })
        .collect();

    let long_map = json!(["null", {"type": "map", "values": "long"}]);
    let bytes_map = json!(["null", {"type": "map", "values": "bytes"}]);
    let definition = json!({
        "type": "record",
        "name": "manifest_entry",
        "fields": [
            {"name": "status", "type": "int", "field-id": 0},
            {"name": "snapshot_id", "type": ["null", "long"], "default": null, "field-id": 1},
            {"name": "sequence_number", "type": ["null", "long"], "default": null, "field-id": 3},
            {"name": "file_sequence_number", "type": ["null", "long"], "default": null, "field-id": 4},
            {
                "name": "data_file",
                "field-id": 2,
                "type": {
                    "type": "record",
                    "name": "r2",
                    "fields": [
                        {"name": "content", "type": "int", "default": 0, "field-id": 134},
                        {"name": "file_path", "type": "string", "field-id": 100},
                        {"name": "file_format", "type": "string", "field-id": 101},
                        {
                            "name": "partition",
                            "field-id": 102,
                            "type": {"type": "record", "name": "r102", "fields": partition_fields}
                        },
                        {"name": "record_count", "type": "long", "field-id": 103},
                        {"name": "file_size_in_bytes", "type": "long", "field-id": 104},
                        {"name": "column_sizes", "type": long_map, "default": null, "field-id": 108},
                        {"name": "value_counts", "type": long_map, "default": null, "field-id": 109},
                        {"name": "null_value_counts", "type": long_map, "default": null, "field-id": 110},
                        {"name": "lower_bounds", "type": bytes_map, "default": null, "field-id": 125},
                        {"name": "upper_bounds", "type": bytes_map, "default": null, "field-id": 128}
                    ]
                }
            }
        ]
    });
    Ok(AvroSchema::parse(&definition)?)
}

fn optional(value: AvroValue) -> AvroValue {
    match value {
        AvroValue::Null => AvroValue::Union(0, Box::new(AvroValue::Null)),
        v => AvroValue::Union(1, Box::new(v)),
    }
}

fn partition_value(value: &Value, ty: &LogicalType) -> AvroValue {
    match (ty, value) {
        (_, Value::Null) => AvroValue::Null,
        (LogicalType::Boolean, Value::Boolean(b)) => AvroValue::Boolean(*b),
        (LogicalType::Integer, Value::Integer(i)) => {
            i32::try_from(*i).map(AvroValue::Int).unwrap_or(AvroValue::Null)
        }
        (LogicalType::Date, Value::Date(d)) => {
            AvroValue::Int(crate::iceberg::encoding::days_from_epoch(d))
        }
        (LogicalType::Long, Value::Integer(i)) => AvroValue::Long(*i),
        (LogicalType::Timestamp, Value::Timestamp(ts)) => {
            AvroValue::Long(crate::iceberg::encoding::micros_from_epoch(ts))
        }
        (LogicalType::Float, Value::Float(f)) => AvroValue::Float(*f as f32),
        (LogicalType::Double, Value::Float(f)) => AvroValue::Double(*f),
        (LogicalType::Float, Value::Integer(i)) => AvroValue::Float(*i as f32),
        (LogicalType::Double, Value::Integer(i)) => AvroValue::Double(*i as f64),
        (LogicalType::Boolean, _)
        | (LogicalType::Integer, _)
        | (LogicalType::Date, _)
        | (LogicalType::Long, _)
        | (LogicalType::Timestamp, _)
        | (LogicalType::Float, _)
        | (LogicalType::Double, _) => AvroValue::Null,
        (_, v) => AvroValue::String(v.to_text()),
    }
}

fn long_map(map: &BTreeMap<i32, i64>) -> AvroValue {
    let values: HashMap<String, AvroValue> = map
        .iter()
        .map(|(k, v)| (k.to_string(), AvroValue::Long(*v)))
        .collect();
    optional(AvroValue::Map(values))
}

fn bytes_map(map: &BTreeMap<i32, Vec<u8>>) -> AvroValue {
    let values: HashMap<String, AvroValue> = map
        .iter()
        .map(|(k, v)| (k.to_string(), AvroValue::Bytes(v.clone())))
        .collect();
    optional(AvroValue::Map(values))
}

fn data_file_value(file: &DataFile, spec: &PartitionSpec, types: &[LogicalType]) -> AvroValue {
    let partition = spec
        .fields
        .iter()
        .zip(types)
        .zip(file.partition_values.iter())
        .map(|((pf, ty), value)| (avro_name(&pf.name), optional(partition_value(value, ty))))
        .collect();

    AvroValue::Record(vec![
        ("content".to_string(), AvroValue::Int(0)),
        ("file_path".to_string(), AvroValue::String(file.path.clone())),
        ("file_format".to_string(), AvroValue::String(file.format.clone())),
        ("partition".to_string(), AvroValue::Record(partition)),
        ("record_count".to_string(), AvroValue::Long(file.record_count)),
        ("file_size_in_bytes".to_string(), AvroValue::Long(file.size_bytes)),
        ("column_sizes".to_string(), long_map(&file.column_sizes)),
        ("value_counts".to_string(), long_map(&file.value_counts)),
        ("null_value_counts".to_string(), long_map(&file.null_counts)),
        ("lower_bounds".to_string(), bytes_map(&file.lower_bounds)),
        ("upper_bounds".to_string(), bytes_map(&file.upper_bounds)),
    ])
}

/// Encode a manifest as an Avro data file with the table's schema and
/// partition spec in the file metadata.
pub fn encode_manifest(
    manifest: &Manifest,
    metadata: &TableMetadata,
    schema: &Schema,
    spec: &PartitionSpec,
    sequence_number: i64,
) -> Result<Vec<u8>> {
    let avro_schema = manifest_entry_schema(schema, spec)?;
    let mut writer = AvroWriter::new(&avro_schema, Vec::new());

    let schema_json = serde_json::to_string(&crate::iceberg::model::SchemaDoc::from(schema))?;
    let spec_json = serde_json::to_string(&spec.fields)?;
    writer.add_user_metadata("schema".to_string(), &schema_json)?;
    writer.add_user_metadata("schema-id".to_string(), schema.schema_id.to_string())?;
    writer.add_user_metadata("partition-spec".to_string(), &spec_json)?;
    writer.add_user_metadata("partition-spec-id".to_string(), spec.spec_id.to_string())?;
    writer.add_user_metadata(
        "format-version".to_string(),
        metadata.format_version.to_string(),
    )?;
    writer.add_user_metadata("content".to_string(), "data")?;

    let types = partition_types(schema, spec);
    for file in &manifest.entries {
        let entry = AvroValue::Record(vec![
            ("status".to_string(), AvroValue::Int(STATUS_ADDED)),
            (
                "snapshot_id".to_string(),
                optional(AvroValue::Long(manifest.snapshot_id)),
            ),
            (
                "sequence_number".to_string(),
                optional(AvroValue::Long(sequence_number)),
            ),
            (
                "file_sequence_number".to_string(),
                optional(AvroValue::Long(sequence_number)),
            ),
            ("data_file".to_string(), data_file_value(file, spec, &types)),
        ]);
        writer.append(entry)?;
    }

    Ok(writer.into_inner()?)
}

/// Encode a manifest list for a snapshot.
pub fn encode_manifest_list(
    entries: &[ManifestListEntry],
    snapshot_id: i64,
    parent_snapshot_id: Option<i64>,
    sequence_number: i64,
) -> Result<Vec<u8>> {
    let schema = manifest_list_schema()?;
    let mut writer = AvroWriter::new(schema, Vec::new());
    writer.add_user_metadata("format-version".to_string(), "2")?;
    writer.add_user_metadata("snapshot-id".to_string(), snapshot_id.to_string())?;
    writer.add_user_metadata(
        "parent-snapshot-id".to_string(),
        parent_snapshot_id.map_or_else(|| "null".to_string(), |p| p.to_string()),
    )?;
    writer.add_user_metadata("sequence-number".to_string(), sequence_number.to_string())?;

    for entry in entries {
        let mut record = Record::new(schema).ok_or_else(|| {
            CommitError::Manifest("manifest list schema is not a record".to_string())
        })?;
        record.put("manifest_path", AvroValue::String(entry.manifest_path.clone()));
        record.put("manifest_length", AvroValue::Long(entry.manifest_length));
        record.put("partition_spec_id", AvroValue::Int(entry.partition_spec_id));
        record.put("content", AvroValue::Int(entry.content));
        record.put("sequence_number", AvroValue::Long(entry.sequence_number));
        record.put("min_sequence_number", AvroValue::Long(entry.min_sequence_number));
        record.put("added_snapshot_id", AvroValue::Long(entry.added_snapshot_id));
        record.put("added_files_count", AvroValue::Int(entry.added_files_count));
        record.put("existing_files_count", AvroValue::Int(entry.existing_files_count));
        record.put("deleted_files_count", AvroValue::Int(entry.deleted_files_count));
        record.put("added_rows_count", AvroValue::Long(entry.added_rows_count));
        record.put("existing_rows_count", AvroValue::Long(entry.existing_rows_count));
        record.put("deleted_rows_count", AvroValue::Long(entry.deleted_rows_count));
        writer.append(record)?;
    }

    Ok(writer.into_inner()?)
}

pub fn decode_manifest_list(bytes: &[u8]) -> Result<Vec<ManifestListEntry>> {
    let reader = AvroReader::new(bytes)?;
    let mut entries = Vec::new();
    for value in reader {
        entries.push(apache_avro::from_value::<ManifestListEntry>(&value?)?);
    }
    Ok(entries)
}

/// The parts of a manifest entry needed to locate and count its data file.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntrySummary {
    pub status: i32,
    pub snapshot_id: Option<i64>,
    pub file_path: String,
    pub record_count: i64,
    pub partition: Vec<(String, AvroValue)>,
}

fn field<'a>(fields: &'a [(String, AvroValue)], name: &str) -> Option<&'a AvroValue> {
    fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn unwrap_union(value: &AvroValue) -> &AvroValue {
    match value {
        AvroValue::Union(_, inner) => inner,
        v => v,
    }
}

pub fn decode_manifest(bytes: &[u8]) -> Result<Vec<ManifestEntrySummary>> {
    let malformed = |what: &str| CommitError::Manifest(format!("malformed manifest entry: {}", what));
    let reader = AvroReader::new(bytes)?;
    let mut entries = Vec::new();

    for value in reader {
        let AvroValue::Record(fields) = value? else {
            return Err(malformed("not a record").into());
        };
        let status = match field(&fields, "status") {
            Some(AvroValue::Int(s)) => *s,
            _ => return Err(malformed("status").into()),
        };
        let snapshot_id = match field(&fields, "snapshot_id").map(unwrap_union) {
            Some(AvroValue::Long(id)) => Some(*id),
            _ => None,
        };
        let Some(AvroValue::Record(data_file)) = field(&fields, "data_file") else {
            return Err(malformed("data_file").into());
        };
        let file_path = match field(data_file, "file_path") {
            Some(AvroValue::String(p)) => p.clone(),
            _ => return Err(malformed("file_path").into()),
        };
        let record_count = match field(data_file, "record_count") {
            Some(AvroValue::Long(c)) => *c,
            _ => return Err(malformed("record_count").into()),
        };
        let partition = match field(data_file, "partition") {
            Some(AvroValue::Record(p)) => p
                .iter()
                .map(|(n, v)| (n.clone(), unwrap_union(v).clone()))
                .collect(),
            _ => Vec::new(),
        };

        entries.push(ManifestEntrySummary {
            status,
            snapshot_id,
            file_path,
            record_count,
            partition,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionFieldConfig;
    use crate::iceberg::model::{build_data_file, build_manifest};
    use crate::types::{Field, Row};
    use chrono::NaiveDate;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new(1, "id", LogicalType::Long),
            Field::new(2, "event-day", LogicalType::Date),
        ])
        .unwrap()
    }

    fn row(id: i64, day: u32) -> Row {
        Row::from([
            ("id".to_string(), Value::Integer(id)),
            (
                "event-day".to_string(),
                Value::Date(NaiveDate::from_ymd_opt(2024, 1, day).unwrap()),
            ),
        ])
    }

    #[test]
    fn test_partitioned_manifest_decodes() {
        let schema = schema();
        let spec = PartitionSpec::from_config(
            &schema,
            &[PartitionFieldConfig {
                source_field: "event-day".into(),
                transform: "day".into(),
            }],
        )
        .unwrap();
        let meta = TableMetadata::new("mem://t", &schema, &spec, BTreeMap::new(), 0);

        let rows = vec![row(1, 2), row(2, 2)];
        let values = spec.partition_values(&schema, &rows[0]);
        let file = build_data_file(&schema, &rows, values).with_file("mem://t/data/a.parquet", 512);
        let manifest = build_manifest("mem://t/metadata/m.avro", vec![file], 77);

        let bytes = encode_manifest(&manifest, &meta, &schema, &spec, 1).unwrap();
        let entries = decode_manifest(&bytes).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, STATUS_ADDED);
        assert_eq!(entries[0].snapshot_id, Some(77));
        assert_eq!(entries[0].file_path, "mem://t/data/a.parquet");
        assert_eq!(entries[0].record_count, 2);
        // 2024-01-02 is day 19724; the dash is not a valid Avro name character.
        assert_eq!(
            entries[0].partition,
            vec![("event_day_day".to_string(), AvroValue::Int(19724))]
        );
    }

    #[test]
    fn test_unpartitioned_manifest_has_empty_partition() {
        let schema = schema();
        let spec = PartitionSpec::unpartitioned();
        let meta = TableMetadata::new("mem://t", &schema, &spec, BTreeMap::new(), 0);
        let file = build_data_file(&schema, &vec![row(9, 5)], vec![]).with_file("f.parquet", 1);
        let manifest = build_manifest("m.avro", vec![file], 5);

        let entries = decode_manifest(&encode_manifest(&manifest, &meta, &schema, &spec, 1).unwrap())
            .unwrap();
        assert!(entries[0].partition.is_empty());
    }

    #[test]
    fn test_manifest_list_preserves_entries() {
        let first = build_manifest("mem://t/metadata/a.avro", vec![], 10);
        let second = build_manifest("mem://t/metadata/b.avro", vec![], 11);
        let entries = vec![
            ManifestListEntry::for_manifest(&first, 100, 0, 1),
            ManifestListEntry::for_manifest(&second, 200, 0, 2),
        ];

        let bytes = encode_manifest_list(&entries, 11, Some(10), 2).unwrap();
        let decoded = decode_manifest_list(&bytes).unwrap();
        assert_eq!(decoded, entries);
        assert_eq!(decoded[1].added_snapshot_id, 11);
    }

    #[test]
    fn test_avro_names() {
        assert_eq!(avro_name("event-day_day"), "event_day_day");
        assert_eq!(avro_name("1st"), "_1st");
        assert_eq!(avro_name(""), "_");
    }
}
