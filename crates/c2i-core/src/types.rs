//! Logical column types, schemas and row values.
//!
//! The type set is closed: every backend matches exhaustively over
//! [`LogicalType`] for literal encoding, DDL mapping and statistics.
//! Nested types (list, struct, map) are carried as strings.

use crate::error::SchemaError;
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum LogicalType {
    Boolean,
    Integer,
    Long,
    Float,
    Double,
    Date,
    Timestamp,
    String,
    Decimal { precision: u8, scale: u8 },
    List,
    Struct,
    Map,
}

impl LogicalType {
    /// Parse the table-format type name (`long`, `decimal(10, 2)`, ...).
    pub fn parse(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        let ty = match lower.as_str() {
            "boolean" | "bool" => LogicalType::Boolean,
            "int" | "integer" => LogicalType::Integer,
            "long" | "bigint" => LogicalType::Long,
            "float" | "real" => LogicalType::Float,
            "double" => LogicalType::Double,
            "date" => LogicalType::Date,
            "timestamp" => LogicalType::Timestamp,
            "string" | "varchar" => LogicalType::String,
            "list" => LogicalType::List,
            "struct" => LogicalType::Struct,
            "map" => LogicalType::Map,
            other if other.starts_with("decimal(") && other.ends_with(')') => {
                let inner = &other["decimal(".len()..other.len() - 1];
                let mut parts = inner.split(',').map(|p| p.trim().parse::<u8>());
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(Ok(precision)), Some(Ok(scale)), None) if scale <= precision => {
                        LogicalType::Decimal { precision, scale }
                    }
                    _ => {
                        return Err(Error::Schema(SchemaError::Missing(format!(
                            "invalid decimal type '{}'",
                            s
                        ))))
                    }
                }
            }
            _ => {
                return Err(Error::Schema(SchemaError::Missing(format!(
                    "unknown type '{}'",
                    s
                ))))
            }
        };
        Ok(ty)
    }

    /// Whether values of this type have a total order usable for bounds.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            LogicalType::Integer
                | LogicalType::Long
                | LogicalType::Float
                | LogicalType::Double
                | LogicalType::Date
                | LogicalType::Timestamp
                | LogicalType::String
                | LogicalType::Decimal { .. }
        )
    }

    /// Whether this type is written as a string because nesting is not modelled.
    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            LogicalType::List | LogicalType::Struct | LogicalType::Map
        )
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Boolean => f.write_str("boolean"),
            LogicalType::Integer => f.write_str("int"),
            LogicalType::Long => f.write_str("long"),
            LogicalType::Float => f.write_str("float"),
            LogicalType::Double => f.write_str("double"),
            LogicalType::Date => f.write_str("date"),
            LogicalType::Timestamp => f.write_str("timestamp"),
            LogicalType::Decimal { precision, scale } => {
                write!(f, "decimal({}, {})", precision, scale)
            }
            // Nested values are stored as their string rendering.
            LogicalType::String | LogicalType::List | LogicalType::Struct | LogicalType::Map => {
                f.write_str("string")
            }
        }
    }
}

/// One schema column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: i32,
    pub name: String,
    #[serde(flatten)]
    pub field_type: LogicalType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl Field {
    pub fn new(id: i32, name: impl Into<String>, field_type: LogicalType) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
            required: false,
            doc: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

/// Ordered list of uniquely identified fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub schema_id: i32,
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, rejecting duplicate field ids or names. Field names
    /// are normalised with [`sanitize_column_name`].
    pub fn new(mut fields: Vec<Field>) -> Result<Self> {
        for field in &mut fields {
            field.name = sanitize_column_name(&field.name);
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for field in &fields {
            if !ids.insert(field.id) {
                return Err(SchemaError::DuplicateFieldId(field.id).into());
            }
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateFieldName(field.name.clone()).into());
            }
        }
        Ok(Self {
            schema_id: 0,
            fields,
        })
    }

    /// Build a schema from `(name, type)` pairs, assigning ids from 1.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, LogicalType)>,
        S: Into<String>,
    {
        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(i, (name, ty))| Field::new(i as i32 + 1, name, ty))
            .collect();
        Self::new(fields)
    }

    /// Load a schema from its JSON form, re-checking uniqueness.
    pub fn from_json(json: &str) -> Result<Self> {
        let parsed: Schema = serde_json::from_str(json)?;
        let mut schema = Schema::new(parsed.fields)?;
        schema.schema_id = parsed.schema_id;
        Ok(schema)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_by_id(&self, id: i32) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Highest field id in the schema.
    pub fn last_column_id(&self) -> i32 {
        self.fields.iter().map(|f| f.id).max().unwrap_or(0)
    }

    /// Check that a row only names known columns and fills every required one.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        for name in row.keys() {
            if self.field_by_name(name).is_none() {
                return Err(Error::Validation(format!(
                    "column '{}' is not in the schema",
                    name
                )));
            }
        }
        for field in &self.fields {
            if field.required && row.get(&field.name).map_or(true, Value::is_null) {
                return Err(Error::Validation(format!(
                    "required column '{}' is missing or null",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

/// A runtime row value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Decimal kept in its exact textual form
    Decimal(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    String(String),
}

/// One input row: column name to value.
pub type Row = HashMap<String, Value>;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerce a JSON value into the declared logical type.
    ///
    /// Strings that cannot be parsed as the declared type are kept as
    /// strings; the encoder then emits an explicit cast and leaves the
    /// final verdict to the engine.
    pub fn from_json(json: &serde_json::Value, ty: &LogicalType) -> Value {
        use serde_json::Value as J;

        match (json, ty) {
            (J::Null, _) => Value::Null,
            (J::Bool(b), LogicalType::Boolean) => Value::Boolean(*b),
            (J::Number(n), LogicalType::Integer | LogicalType::Long) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::String(n.to_string()),
            },
            (J::Number(n), LogicalType::Float | LogicalType::Double) => match n.as_f64() {
                Some(f) => Value::Float(f),
                None => Value::String(n.to_string()),
            },
            (J::Number(n), LogicalType::Decimal { .. }) => Value::Decimal(n.to_string()),
            (J::String(s), LogicalType::Decimal { .. }) if is_decimal_text(s) => {
                Value::Decimal(s.clone())
            }
            (J::String(s), LogicalType::Date) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .unwrap_or_else(|_| Value::String(s.clone())),
            (J::String(s), LogicalType::Timestamp) => parse_timestamp(s)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::String(s.clone())),
            (J::String(s), _) => Value::String(s.clone()),
            (J::Bool(b), _) => Value::Boolean(*b),
            (J::Number(n), _) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            (nested @ (J::Array(_) | J::Object(_)), _) => Value::String(nested.to_string()),
        }
    }

    /// Best-effort textual rendering, used for nested and fallback columns.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            Value::String(s) => s.clone(),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn is_decimal_text(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("0");
    !int_part.is_empty()
        && int_part.chars().all(|c| c.is_ascii_digit())
        && !frac_part.is_empty()
        && frac_part.chars().all(|c| c.is_ascii_digit())
}

/// Normalise a column name for use as an engine identifier.
pub fn sanitize_column_name(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Rewrite a row's keys to the names [`Schema`] uses.
pub fn normalize_row(row: Row) -> Row {
    row.into_iter()
        .map(|(name, value)| (sanitize_column_name(&name), value))
        .collect()
}
