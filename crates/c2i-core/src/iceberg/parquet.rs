//! Rows to Arrow record batches to Parquet bytes.

use crate::config::ParquetCompression;
use crate::error::WriteError;
use crate::iceberg::encoding::{days_from_epoch, decimal_unscaled, micros_from_epoch};
use crate::types::{Field as SchemaField, LogicalType, Row, Schema, Value};
use crate::{Error, Result};
use arrow::array::{
    ArrayRef, BooleanBuilder, Date32Builder, Decimal128Builder, Float32Builder, Float64Builder,
    Int32Builder, Int64Builder, StringBuilder, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use parquet::arrow::{ArrowWriter, PARQUET_FIELD_ID_META_KEY};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

/// Arrow type a column is written as.
pub fn arrow_type(ty: &LogicalType) -> DataType {
    match ty {
        LogicalType::Boolean => DataType::Boolean,
        LogicalType::Integer => DataType::Int32,
        LogicalType::Long => DataType::Int64,
        LogicalType::Float => DataType::Float32,
        LogicalType::Double => DataType::Float64,
        LogicalType::Date => DataType::Date32,
        LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        LogicalType::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale as i8),
        LogicalType::String | LogicalType::List | LogicalType::Struct | LogicalType::Map => {
            DataType::Utf8
        }
    }
}

/// Arrow schema carrying Iceberg field ids in the Parquet field-id metadata.
pub fn arrow_schema(schema: &Schema) -> ArrowSchema {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| {
            Field::new(&f.name, arrow_type(&f.field_type), !f.required).with_metadata(
                HashMap::from([(PARQUET_FIELD_ID_META_KEY.to_string(), f.id.to_string())]),
            )
        })
        .collect();
    ArrowSchema::new(fields)
}

fn mismatch(field: &SchemaField, value: &Value) -> Error {
    WriteError::DataFile(format!(
        "column '{}' of type {} cannot hold value {:?}",
        field.name, field.field_type, value
    ))
    .into()
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        Value::String(s) | Value::Decimal(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Integer(i) => Some(*i as f64),
        Value::String(s) | Value::Decimal(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        Value::String(s) => s.trim().to_lowercase().parse().ok(),
        _ => None,
    }
}

fn as_date(value: &Value) -> Option<i32> {
    match value {
        Value::Date(d) => Some(days_from_epoch(d)),
        Value::Timestamp(ts) => Some(days_from_epoch(&ts.date())),
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .map(|d| days_from_epoch(&d)),
        _ => None,
    }
}

fn as_micros(value: &Value) -> Option<i64> {
    match value {
        Value::Timestamp(ts) => Some(micros_from_epoch(ts)),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map(|ts| micros_from_epoch(&ts)),
        _ => None,
    }
}

/// Build one column with `$builder`, converting each non-null value with `$convert`.
macro_rules! build_column {
    ($builder:expr, $field:expr, $rows:expr, $convert:expr) => {{
        let mut builder = $builder;
        for row in $rows {
            match row.get(&$field.name) {
                None | Some(Value::Null) => builder.append_null(),
                Some(value) => {
                    let converted = $convert(value).ok_or_else(|| mismatch($field, value))?;
                    builder.append_value(converted);
                }
            }
        }
        Arc::new(builder.finish()) as ArrayRef
    }};
}

fn build_array(field: &SchemaField, rows: &[&Row]) -> Result<ArrayRef> {
    let n = rows.len();
    let array = match field.field_type {
        LogicalType::Boolean => build_column!(BooleanBuilder::with_capacity(n), field, rows, as_bool),
        LogicalType::Integer => build_column!(Int32Builder::with_capacity(n), field, rows, |v| {
            as_i64(v).and_then(|i| i32::try_from(i).ok())
        }),
        LogicalType::Long => build_column!(Int64Builder::with_capacity(n), field, rows, as_i64),
        LogicalType::Float => build_column!(Float32Builder::with_capacity(n), field, rows, |v| {
            as_f64(v).map(|f| f as f32)
        }),
        LogicalType::Double => build_column!(Float64Builder::with_capacity(n), field, rows, as_f64),
        LogicalType::Date => build_column!(Date32Builder::with_capacity(n), field, rows, as_date),
        LogicalType::Timestamp => build_column!(
            TimestampMicrosecondBuilder::with_capacity(n),
            field,
            rows,
            as_micros
        ),
        LogicalType::Decimal { precision, scale } => {
            let builder = Decimal128Builder::with_capacity(n)
                .with_precision_and_scale(precision, scale as i8)?;
            build_column!(builder, field, rows, |v: &Value| match v {
                Value::Decimal(s) | Value::String(s) => decimal_unscaled(s, scale),
                Value::Integer(i) => decimal_unscaled(&i.to_string(), scale),
                _ => None,
            })
        }
        LogicalType::String | LogicalType::List | LogicalType::Struct | LogicalType::Map => {
            build_column!(StringBuilder::with_capacity(n, n * 16), field, rows, |v: &Value| {
                Some(v.to_text())
            })
        }
    };
    Ok(array)
}

/// Convert rows into a record batch in schema column order.
///
/// Values are coerced to the column type where lossless (numeric text,
/// ISO dates); anything else fails the batch.
pub fn rows_to_record_batch(schema: &Schema, rows: &[&Row]) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|f| build_array(f, rows))
        .collect::<Result<Vec<_>>>()?;
    Ok(RecordBatch::try_new(Arc::new(arrow_schema(schema)), columns)?)
}

fn compression(codec: ParquetCompression) -> Compression {
    match codec {
        ParquetCompression::Snappy => Compression::SNAPPY,
        ParquetCompression::Gzip => Compression::GZIP(Default::default()),
        ParquetCompression::Lz4 => Compression::LZ4,
        ParquetCompression::Zstd => Compression::ZSTD(Default::default()),
        ParquetCompression::None => Compression::UNCOMPRESSED,
    }
}

/// Encode a record batch as a single Parquet file.
pub fn write_parquet(batch: &RecordBatch, codec: ParquetCompression) -> Result<Bytes> {
    let mut buffer = Cursor::new(Vec::new());
    let props = WriterProperties::builder()
        .set_compression(compression(codec))
        .set_max_row_group_size(128 * 1024)
        .set_write_batch_size(1024)
        .build();

    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    Ok(Bytes::from(buffer.into_inner()))
}
