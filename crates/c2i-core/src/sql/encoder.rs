//! SQL literal encoding for row values.
//!
//! When the target column type is known the literal form follows it;
//! otherwise the type is inferred from the value itself. Strings headed
//! for non-string columns become explicit casts unless they are an exact
//! literal of the target type, so the engine does the final validation.

use crate::sql::types::SqlType;
use crate::types::Value;
use chrono::{NaiveDate, NaiveDateTime};

/// The engine's NULL literal.
pub const NULL_LITERAL: &str = "NULL";

/// Quote a string as a SQL literal, doubling embedded single quotes.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote an identifier, doubling embedded double quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn date_literal(date: &NaiveDate) -> String {
    format!("DATE '{}'", date.format("%Y-%m-%d"))
}

fn timestamp_literal(ts: &NaiveDateTime) -> String {
    format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f"))
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "CAST('NaN' AS DOUBLE)".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("CAST('{}Infinity' AS DOUBLE)", sign)
    } else if f != 0.0 && !(1e-6..1e15).contains(&f.abs()) {
        // Plain digits would be read as a DECIMAL, which caps at 38 digits.
        format!("{:e}", f)
    } else {
        // Shortest representation that parses back to the same f64.
        let text = f.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{}.0", text)
        }
    }
}

fn cast(expr: &str, ty: &SqlType) -> String {
    format!("CAST({} AS {})", expr, ty)
}

/// Encode a value as a literal, guided by the target column type when known.
pub fn encode(value: &Value, target: Option<&SqlType>) -> String {
    if value.is_null() {
        return NULL_LITERAL.to_string();
    }

    match target {
        Some(ty) => encode_for_type(value, ty),
        None => encode_inferred(value),
    }
}

/// Encode from the value's runtime kind alone.
fn encode_inferred(value: &Value) -> String {
    match value {
        Value::Null => NULL_LITERAL.to_string(),
        Value::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => float_literal(*f),
        Value::Decimal(d) => format!("DECIMAL {}", quote_string(d)),
        Value::Date(d) => date_literal(d),
        Value::Timestamp(ts) => timestamp_literal(ts),
        Value::String(s) => quote_string(s),
    }
}

fn encode_for_type(value: &Value, ty: &SqlType) -> String {
    match ty {
        SqlType::Boolean => match value {
            Value::Boolean(_) => encode_inferred(value),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => "TRUE".to_string(),
                "false" => "FALSE".to_string(),
                _ => cast(&quote_string(s), ty),
            },
            other => cast(&encode_inferred(other), ty),
        },

        SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => match value {
            Value::Integer(i) => i.to_string(),
            Value::Boolean(b) => (if *b { "1" } else { "0" }).to_string(),
            // Only an exact integer rendering passes as a bare literal.
            Value::String(s) if s.parse::<i64>().map(|i| i.to_string() == *s).unwrap_or(false) => {
                s.clone()
            }
            Value::String(s) => cast(&quote_string(s), ty),
            other => cast(&encode_inferred(other), ty),
        },

        SqlType::Real | SqlType::Double => match value {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => float_literal(*f),
            Value::String(s) => cast(&quote_string(s), ty),
            other => cast(&encode_inferred(other), ty),
        },

        SqlType::Decimal { .. } => match value {
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => format!("DECIMAL {}", quote_string(d)),
            Value::String(s) => cast(&quote_string(s), ty),
            other => cast(&encode_inferred(other), ty),
        },

        SqlType::Date => match value {
            Value::Date(d) => date_literal(d),
            Value::Timestamp(ts) => date_literal(&ts.date()),
            Value::String(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(d) => date_literal(&d),
                Err(_) => cast(&quote_string(s), ty),
            },
            other => cast(&encode_inferred(other), ty),
        },

        SqlType::Timestamp => match value {
            Value::Timestamp(ts) => timestamp_literal(ts),
            Value::Date(d) => match d.and_hms_opt(0, 0, 0) {
                Some(ts) => timestamp_literal(&ts),
                None => cast(&date_literal(d), ty),
            },
            // Epoch seconds
            Value::Integer(i) => cast(&format!("from_unixtime({})", i), ty),
            Value::String(s) => cast(&quote_string(s), ty),
            other => cast(&encode_inferred(other), ty),
        },

        SqlType::Varchar | SqlType::Char => match value {
            Value::String(s) => quote_string(s),
            other => quote_string(&other.to_text()),
        },

        SqlType::Other(_) => match value {
            Value::String(s) => cast(&quote_string(s), ty),
            other => encode_inferred(other),
        },
    }
}
