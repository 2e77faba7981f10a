//! Row sources feeding a conversion.

use crate::types::{normalize_row, sanitize_column_name, Row, Schema, Value};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// A finite, ordered stream of rows matching one schema.
#[async_trait]
pub trait RowSource: Send {
    fn schema(&self) -> &Schema;

    /// Total number of rows, when known up front.
    fn total_rows(&self) -> Option<usize>;

    /// Up to `max` next rows; empty once exhausted.
    async fn next_batch(&mut self, max: usize) -> Result<Vec<Row>>;
}

/// Rows held in memory. Row keys are normalised like schema field names.
pub struct VecRowSource {
    schema: Schema,
    total: usize,
    rows: VecDeque<Row>,
}

impl VecRowSource {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            schema,
            total: rows.len(),
            rows: rows.into_iter().map(normalize_row).collect(),
        }
    }
}

#[async_trait]
impl RowSource for VecRowSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn total_rows(&self) -> Option<usize> {
        Some(self.total)
    }

    async fn next_batch(&mut self, max: usize) -> Result<Vec<Row>> {
        let n = max.min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }
}

/// Newline-delimited JSON objects, one row per non-empty line.
///
/// Keys are normalised like column names and values are coerced to the
/// declared column types. Every row is validated against the schema.
pub struct JsonLinesSource {
    path: PathBuf,
    schema: Schema,
    total: usize,
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl JsonLinesSource {
    /// Open `path`, counting its rows with a first pass.
    pub async fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut counter = BufReader::new(File::open(&path).await?).lines();
        let mut total = 0;
        while let Some(line) = counter.next_line().await? {
            if !line.trim().is_empty() {
                total += 1;
            }
        }

        let lines = BufReader::new(File::open(&path).await?).lines();
        Ok(Self {
            path,
            schema,
            total,
            lines,
            line_number: 0,
        })
    }

    fn parse_line(&self, line: &str) -> Result<Row> {
        let json: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            Error::Validation(format!(
                "{}:{}: invalid JSON: {}",
                self.path.display(),
                self.line_number,
                e
            ))
        })?;
        let serde_json::Value::Object(object) = json else {
            return Err(Error::Validation(format!(
                "{}:{}: expected a JSON object",
                self.path.display(),
                self.line_number
            )));
        };

        let row: Row = object
            .iter()
            .map(|(key, value)| {
                let name = sanitize_column_name(key);
                let converted = match self.schema.field_by_name(&name) {
                    Some(field) => Value::from_json(value, &field.field_type),
                    None => Value::from_json(value, &crate::types::LogicalType::String),
                };
                (name, converted)
            })
            .collect();

        self.schema.validate_row(&row).map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!(
                "{}:{}: {}",
                self.path.display(),
                self.line_number,
                msg
            )),
            other => other,
        })?;
        Ok(row)
    }
}

#[async_trait]
impl RowSource for JsonLinesSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn total_rows(&self) -> Option<usize> {
        Some(self.total)
    }

    async fn next_batch(&mut self, max: usize) -> Result<Vec<Row>> {
        let mut batch = Vec::with_capacity(max.min(self.total));
        while batch.len() < max {
            let Some(line) = self.lines.next_line().await? else {
                break;
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            batch.push(self.parse_line(&line)?);
        }
        Ok(batch)
    }
}
