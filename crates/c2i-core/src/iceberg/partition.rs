//! Partition specs and transforms.

use crate::config::PartitionFieldConfig;
use crate::error::SchemaError;
use crate::iceberg::encoding::{decimal_to_string, days_from_epoch, micros_from_epoch, OrderedValue};
use crate::types::{LogicalType, Row, Schema, Value};
use crate::Result;
use chrono::Datelike;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// First partition field id.
pub const PARTITION_FIELD_ID_START: i32 = 1000;

/// `last-partition-id` of an unpartitioned table.
pub const UNPARTITIONED_LAST_ID: i32 = 999;

const MICROS_PER_HOUR: i64 = 3_600_000_000;

/// Partition transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Identity,
    Year,
    Month,
    Day,
    Hour,
    Bucket(u32),
    Truncate(u32),
}

impl Transform {
    /// Parse `identity`, `year`, `month`, `day`, `hour`, `bucket[N]` or
    /// `truncate[N]`. Parentheses are accepted in place of brackets.
    pub fn parse(s: &str) -> std::result::Result<Self, SchemaError> {
        let lower = s.trim().to_lowercase();
        let invalid = || SchemaError::InvalidTransform(s.to_string());

        let parameterised = |name: &str| -> std::result::Result<Option<u32>, SchemaError> {
            let Some(rest) = lower.strip_prefix(name) else {
                return Ok(None);
            };
            let inner = rest
                .strip_prefix('[')
                .and_then(|r| r.strip_suffix(']'))
                .or_else(|| rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')))
                .ok_or_else(invalid)?;
            match inner.trim().parse::<u32>() {
                Ok(n) if n > 0 => Ok(Some(n)),
                _ => Err(SchemaError::InvalidTransform(format!(
                    "{}: parameter must be a positive integer",
                    s
                ))),
            }
        };

        match lower.as_str() {
            "identity" => return Ok(Transform::Identity),
            "year" | "years" => return Ok(Transform::Year),
            "month" | "months" => return Ok(Transform::Month),
            "day" | "days" => return Ok(Transform::Day),
            "hour" | "hours" => return Ok(Transform::Hour),
            _ => {}
        }

        if let Some(n) = parameterised("bucket")? {
            return Ok(Transform::Bucket(n));
        }
        if let Some(n) = parameterised("truncate")? {
            return Ok(Transform::Truncate(n));
        }
        Err(invalid())
    }

    /// Whether the transform can be applied to a column of type `ty`.
    pub fn supports(&self, ty: &LogicalType) -> bool {
        match self {
            Transform::Identity => !ty.is_nested(),
            Transform::Year | Transform::Month | Transform::Day => {
                matches!(ty, LogicalType::Date | LogicalType::Timestamp)
            }
            Transform::Hour => matches!(ty, LogicalType::Timestamp),
            Transform::Bucket(_) => matches!(
                ty,
                LogicalType::Integer
                    | LogicalType::Long
                    | LogicalType::String
                    | LogicalType::Date
                    | LogicalType::Timestamp
                    | LogicalType::Decimal { .. }
            ),
            Transform::Truncate(_) => matches!(
                ty,
                LogicalType::Integer
                    | LogicalType::Long
                    | LogicalType::String
                    | LogicalType::Decimal { .. }
            ),
        }
    }

    /// Type of the partition values produced from a `source` column.
    pub fn result_type(&self, source: &LogicalType) -> LogicalType {
        match self {
            Transform::Identity | Transform::Truncate(_) => *source,
            _ => LogicalType::Integer,
        }
    }

    /// Compute the partition value for `value` from a column of type `ty`.
    ///
    /// Nulls map to null. Values that cannot be interpreted as `ty` also map
    /// to null rather than failing the write.
    pub fn apply(&self, value: &Value, ty: &LogicalType) -> Value {
        if value.is_null() {
            return Value::Null;
        }

        match self {
            Transform::Identity => value.clone(),
            Transform::Year => match value {
                Value::Date(d) => Value::Integer((d.year() - 1970) as i64),
                Value::Timestamp(ts) => Value::Integer((ts.year() - 1970) as i64),
                _ => Value::Null,
            },
            Transform::Month => match value {
                Value::Date(d) => Value::Integer(months_from_epoch(d.year(), d.month())),
                Value::Timestamp(ts) => Value::Integer(months_from_epoch(ts.year(), ts.month())),
                _ => Value::Null,
            },
            Transform::Day => match value {
                Value::Date(d) => Value::Integer(days_from_epoch(d) as i64),
                Value::Timestamp(ts) => Value::Integer(days_from_epoch(&ts.date()) as i64),
                _ => Value::Null,
            },
            Transform::Hour => match value {
                Value::Timestamp(ts) => {
                    Value::Integer(micros_from_epoch(ts).div_euclid(MICROS_PER_HOUR))
                }
                _ => Value::Null,
            },
            Transform::Bucket(n) => OrderedValue::from_value(value, ty)
                .and_then(|v| v.hash_bytes())
                .and_then(|bytes| murmur3::murmur3_32(&mut Cursor::new(bytes), 0).ok())
                .map(|hash| Value::Integer(((hash & i32::MAX as u32) % n) as i64))
                .unwrap_or(Value::Null),
            Transform::Truncate(w) => truncate(value, ty, *w),
        }
    }
}

fn months_from_epoch(year: i32, month: u32) -> i64 {
    (year as i64 - 1970) * 12 + (month as i64 - 1)
}

fn truncate(value: &Value, ty: &LogicalType, width: u32) -> Value {
    if width == 0 {
        return Value::Null;
    }
    let w = width as i64;
    // Values whose truncation falls below the type's minimum have no partition.
    match (ty, value) {
        (LogicalType::Integer | LogicalType::Long, Value::Integer(v)) => v
            .checked_sub(v.rem_euclid(w))
            .map(Value::Integer)
            .unwrap_or(Value::Null),
        (LogicalType::String, Value::String(s)) => {
            Value::String(s.chars().take(width as usize).collect())
        }
        (LogicalType::Decimal { scale, .. }, _) => {
            match OrderedValue::from_value(value, ty) {
                Some(OrderedValue::Decimal(u)) => {
                    let w = width as i128;
                    u.checked_sub(u.rem_euclid(w))
                        .map(|t| Value::Decimal(decimal_to_string(t, *scale)))
                        .unwrap_or(Value::Null)
                }
                _ => Value::Null,
            }
        }
        _ => Value::Null,
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => f.write_str("identity"),
            Transform::Year => f.write_str("year"),
            Transform::Month => f.write_str("month"),
            Transform::Day => f.write_str("day"),
            Transform::Hour => f.write_str("hour"),
            Transform::Bucket(n) => write!(f, "bucket[{}]", n),
            Transform::Truncate(w) => write!(f, "truncate[{}]", w),
        }
    }
}

impl FromStr for Transform {
    type Err = SchemaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Transform::parse(s)
    }
}

impl Serialize for Transform {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Transform::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One partition field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionField {
    #[serde(rename = "source-id")]
    pub source_field_id: i32,
    #[serde(rename = "field-id")]
    pub field_id: i32,
    pub name: String,
    pub transform: Transform,
}

/// Ordered partition fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartitionSpec {
    #[serde(rename = "spec-id")]
    pub spec_id: i32,
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    /// Build a spec, checking that every source field exists in `schema` and
    /// supports its transform.
    pub fn new(schema: &Schema, fields: Vec<PartitionField>) -> Result<Self> {
        for field in &fields {
            let source = schema.field_by_id(field.source_field_id).ok_or_else(|| {
                SchemaError::UnknownSourceField {
                    name: field.name.clone(),
                    source_field_id: field.source_field_id,
                }
            })?;
            if !field.transform.supports(&source.field_type) {
                return Err(SchemaError::InvalidTransform(format!(
                    "{} cannot be applied to column '{}' of type {}",
                    field.transform, source.name, source.field_type
                ))
                .into());
            }
        }
        Ok(Self { spec_id: 0, fields })
    }

    /// Build a spec from configured column names and transforms.
    ///
    /// Field ids start at 1000; identity fields keep the column name and
    /// other fields are named `<column>_<transform>`.
    pub fn from_config(schema: &Schema, configured: &[PartitionFieldConfig]) -> Result<Self> {
        let fields = configured
            .iter()
            .enumerate()
            .map(|(i, cfg)| {
                let source = schema
                    .field_by_name(&cfg.source_field)
                    .ok_or_else(|| SchemaError::UnknownColumn(cfg.source_field.clone()))?;
                let transform = Transform::parse(&cfg.transform)?;
                let name = match transform {
                    Transform::Identity => source.name.clone(),
                    Transform::Bucket(_) => format!("{}_bucket", source.name),
                    Transform::Truncate(_) => format!("{}_trunc", source.name),
                    other => format!("{}_{}", source.name, other),
                };
                Ok(PartitionField {
                    source_field_id: source.id,
                    field_id: PARTITION_FIELD_ID_START + i as i32,
                    name,
                    transform,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(schema, fields)
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }

    /// Highest partition field id, 999 when unpartitioned.
    pub fn last_field_id(&self) -> i32 {
        self.fields
            .iter()
            .map(|f| f.field_id)
            .max()
            .unwrap_or(UNPARTITIONED_LAST_ID)
    }

    /// Partition tuple of one row, in field order.
    pub fn partition_values(&self, schema: &Schema, row: &Row) -> Vec<Value> {
        self.fields
            .iter()
            .map(|pf| match schema.field_by_id(pf.source_field_id) {
                Some(source) => {
                    let value = row.get(&source.name).unwrap_or(&Value::Null);
                    pf.transform.apply(value, &source.field_type)
                }
                None => Value::Null,
            })
            .collect()
    }

    /// Split rows into groups sharing one partition tuple, keeping the
    /// first-seen order of tuples and the input order within each group.
    pub fn split_rows<'a>(&self, schema: &Schema, rows: &'a [Row]) -> Vec<(Vec<Value>, Vec<&'a Row>)> {
        let mut groups: Vec<(Vec<Value>, Vec<&'a Row>)> = Vec::new();
        for row in rows {
            let key = self.partition_values(schema, row);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        groups
    }
}
