//! Engine column types and their mapping from logical types.

use crate::types::LogicalType;
use std::fmt;

/// A column type as reported by the SQL engine's catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal { precision: u8, scale: u8 },
    Date,
    Timestamp,
    Varchar,
    Char,
    /// Any type this writer does not special-case (arrays, rows, maps, ...)
    Other(String),
}

impl SqlType {
    /// Parse a type name from `information_schema.columns.data_type`.
    pub fn parse(type_name: &str) -> Self {
        let lower = type_name.trim().to_lowercase();
        let base = lower.split('(').next().unwrap_or("").trim();

        match base {
            "boolean" => SqlType::Boolean,
            "tinyint" => SqlType::TinyInt,
            "smallint" => SqlType::SmallInt,
            "integer" | "int" => SqlType::Integer,
            "bigint" => SqlType::BigInt,
            "real" => SqlType::Real,
            "double" => SqlType::Double,
            "date" => SqlType::Date,
            "varchar" => SqlType::Varchar,
            "char" => SqlType::Char,
            // timestamp, timestamp(6), timestamp(6) with time zone
            b if b.starts_with("timestamp") => SqlType::Timestamp,
            "decimal" => parse_decimal(&lower).unwrap_or_else(|| SqlType::Other(lower.clone())),
            _ => SqlType::Other(lower.clone()),
        }
    }

    /// The engine type used in CREATE TABLE for a logical type.
    pub fn from_logical(ty: &LogicalType) -> Self {
        match ty {
            LogicalType::Boolean => SqlType::Boolean,
            LogicalType::Integer => SqlType::Integer,
            LogicalType::Long => SqlType::BigInt,
            LogicalType::Float => SqlType::Real,
            LogicalType::Double => SqlType::Double,
            LogicalType::Date => SqlType::Date,
            LogicalType::Timestamp => SqlType::Timestamp,
            LogicalType::Decimal { precision, scale } => SqlType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            LogicalType::String | LogicalType::List | LogicalType::Struct | LogicalType::Map => {
                SqlType::Varchar
            }
        }
    }

    /// Upper-case base name without parameters, e.g. `DECIMAL`.
    pub fn base_name(&self) -> String {
        match self {
            SqlType::Boolean => "BOOLEAN".into(),
            SqlType::TinyInt => "TINYINT".into(),
            SqlType::SmallInt => "SMALLINT".into(),
            SqlType::Integer => "INTEGER".into(),
            SqlType::BigInt => "BIGINT".into(),
            SqlType::Real => "REAL".into(),
            SqlType::Double => "DOUBLE".into(),
            SqlType::Decimal { .. } => "DECIMAL".into(),
            SqlType::Date => "DATE".into(),
            SqlType::Timestamp => "TIMESTAMP".into(),
            SqlType::Varchar => "VARCHAR".into(),
            SqlType::Char => "CHAR".into(),
            SqlType::Other(name) => name
                .split('(')
                .next()
                .unwrap_or(name)
                .trim()
                .to_uppercase(),
        }
    }

    /// Whether an existing column of type `self` can take data declared as `declared`.
    ///
    /// Identical base types always match. Otherwise the widening table is:
    /// INTEGER takes BIGINT/DOUBLE/DECIMAL, BIGINT takes DOUBLE/DECIMAL,
    /// REAL takes DOUBLE, and VARCHAR and CHAR take each other.
    pub fn accepts(&self, declared: &SqlType) -> bool {
        let existing = self.base_name();
        let declared = declared.base_name();
        if existing == declared {
            return true;
        }

        let compatible: &[&str] = match existing.as_str() {
            "INTEGER" => &["BIGINT", "DOUBLE", "DECIMAL"],
            "BIGINT" => &["DOUBLE", "DECIMAL"],
            "REAL" => &["DOUBLE"],
            "VARCHAR" => &["CHAR"],
            "CHAR" => &["VARCHAR"],
            _ => &[],
        };
        compatible.contains(&declared.as_str())
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, SqlType::Varchar | SqlType::Char)
    }
}

fn parse_decimal(lower: &str) -> Option<SqlType> {
    let inner = lower.strip_prefix("decimal(")?.strip_suffix(')')?;
    let mut parts = inner.split(',').map(|p| p.trim().parse::<u8>().ok());
    let precision = parts.next()??;
    let scale = parts.next().unwrap_or(Some(0))?;
    Some(SqlType::Decimal { precision, scale })
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Decimal { precision, scale } => write!(f, "DECIMAL({}, {})", precision, scale),
            SqlType::Timestamp => f.write_str("TIMESTAMP(6)"),
            SqlType::Other(name) => f.write_str(&name.to_uppercase()),
            other => f.write_str(&other.base_name()),
        }
    }
}
