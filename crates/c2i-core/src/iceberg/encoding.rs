//! Iceberg single-value binary serialization.
//!
//! Used for column bounds in manifests and as bucket hash input. Numbers,
//! dates and timestamps are little-endian; decimals are the minimal
//! big-endian two's complement of the unscaled value.

use crate::types::{LogicalType, Value};
use chrono::{NaiveDate, NaiveDateTime};

/// Days since 1970-01-01.
pub fn days_from_epoch(date: &NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
    (*date - epoch).num_days() as i32
}

/// Microseconds since 1970-01-01T00:00:00.
pub fn micros_from_epoch(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_micros()
}

/// Parse decimal text into its unscaled value at `scale`.
///
/// Returns `None` when the text has more fractional digits than `scale`
/// or does not fit in an `i128`.
pub fn decimal_unscaled(text: &str, scale: u8) -> Option<i128> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > scale as usize {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let padded = format!(
        "{}{}{}",
        int_part,
        frac_part,
        "0".repeat(scale as usize - frac_part.len())
    );
    let unscaled: i128 = if padded.is_empty() { 0 } else { padded.parse().ok()? };
    Some(if negative { -unscaled } else { unscaled })
}

/// Render an unscaled decimal back to text at `scale`.
pub fn decimal_to_string(unscaled: i128, scale: u8) -> String {
    if scale == 0 {
        return unscaled.to_string();
    }
    let sign = if unscaled < 0 { "-" } else { "" };
    let digits = format!("{:0>width$}", unscaled.unsigned_abs(), width = scale as usize + 1);
    let (int_part, frac_part) = digits.split_at(digits.len() - scale as usize);
    format!("{}{}.{}", sign, int_part, frac_part)
}

/// Minimal big-endian two's complement bytes of a decimal's unscaled value.
pub fn decimal_bytes(unscaled: i128) -> Vec<u8> {
    let bytes = unscaled.to_be_bytes();
    let mut start = 0;
    // Drop redundant sign bytes while the next byte keeps the same sign bit.
    while start < bytes.len() - 1 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

/// A value normalised to the physical form of its column type, with a
/// total order for bounds.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum OrderedValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Date(i32),
    Timestamp(i64),
    String(String),
    Decimal(i128),
}

impl OrderedValue {
    /// Normalise `value` for a column of type `ty`. Values that do not fit
    /// the type, NaN and unordered types yield `None`.
    pub fn from_value(value: &Value, ty: &LogicalType) -> Option<Self> {
        match (ty, value) {
            (LogicalType::Integer, Value::Integer(i)) => i32::try_from(*i).ok().map(Self::Int),
            (LogicalType::Long, Value::Integer(i)) => Some(Self::Long(*i)),
            (LogicalType::Float, Value::Float(f)) if !f.is_nan() => Some(Self::Float(*f as f32)),
            (LogicalType::Float, Value::Integer(i)) => Some(Self::Float(*i as f32)),
            (LogicalType::Double, Value::Float(f)) if !f.is_nan() => Some(Self::Double(*f)),
            (LogicalType::Double, Value::Integer(i)) => Some(Self::Double(*i as f64)),
            (LogicalType::Date, Value::Date(d)) => Some(Self::Date(days_from_epoch(d))),
            (LogicalType::Timestamp, Value::Timestamp(ts)) => {
                Some(Self::Timestamp(micros_from_epoch(ts)))
            }
            (LogicalType::Timestamp, Value::Date(d)) => d
                .and_hms_opt(0, 0, 0)
                .map(|ts| Self::Timestamp(micros_from_epoch(&ts))),
            (LogicalType::String, v) if !v.is_null() => Some(Self::String(v.to_text())),
            (LogicalType::Decimal { scale, .. }, Value::Decimal(d) | Value::String(d)) => {
                decimal_unscaled(d, *scale).map(Self::Decimal)
            }
            (LogicalType::Decimal { scale, .. }, Value::Integer(i)) => {
                decimal_unscaled(&i.to_string(), *scale).map(Self::Decimal)
            }
            _ => None,
        }
    }

    /// Single-value binary serialization.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int(i) | Self::Date(i) => i.to_le_bytes().to_vec(),
            Self::Long(l) | Self::Timestamp(l) => l.to_le_bytes().to_vec(),
            Self::Float(f) => f.to_le_bytes().to_vec(),
            Self::Double(d) => d.to_le_bytes().to_vec(),
            Self::String(s) => s.as_bytes().to_vec(),
            Self::Decimal(u) => decimal_bytes(*u),
        }
    }

    /// Bytes hashed by the bucket transform. Integer kinds hash as longs.
    pub fn hash_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Int(i) | Self::Date(i) => Some((*i as i64).to_le_bytes().to_vec()),
            Self::Long(l) | Self::Timestamp(l) => Some(l.to_le_bytes().to_vec()),
            Self::String(s) => Some(s.as_bytes().to_vec()),
            Self::Decimal(u) => Some(decimal_bytes(*u)),
            Self::Float(_) | Self::Double(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_offsets() {
        let date = NaiveDate::from_ymd_opt(2017, 11, 16).unwrap();
        assert_eq!(days_from_epoch(&date), 17486);
        assert_eq!(days_from_epoch(&NaiveDate::from_ymd_opt(1969, 12, 31).unwrap()), -1);

        let ts = date.and_hms_opt(22, 31, 8).unwrap();
        assert_eq!(micros_from_epoch(&ts), 1_510_871_468_000_000);
    }

    #[test]
    fn test_decimal_text() {
        assert_eq!(decimal_unscaled("14.20", 2), Some(1420));
        assert_eq!(decimal_unscaled("14.2", 2), Some(1420));
        assert_eq!(decimal_unscaled("-0.05", 2), Some(-5));
        assert_eq!(decimal_unscaled("7", 3), Some(7000));
        assert_eq!(decimal_unscaled("1.234", 2), None);
        assert_eq!(decimal_unscaled("abc", 2), None);
        assert_eq!(decimal_to_string(1420, 2), "14.20");
        assert_eq!(decimal_to_string(-5, 2), "-0.05");
        assert_eq!(decimal_to_string(42, 0), "42");
    }

    #[test]
    fn test_decimal_bytes_minimal() {
        assert_eq!(decimal_bytes(0), vec![0x00]);
        assert_eq!(decimal_bytes(1420), vec![0x05, 0x8C]);
        assert_eq!(decimal_bytes(127), vec![0x7F]);
        assert_eq!(decimal_bytes(128), vec![0x00, 0x80]);
        assert_eq!(decimal_bytes(-1), vec![0xFF]);
        assert_eq!(decimal_bytes(-129), vec![0xFF, 0x7F]);
    }

    #[test]
    fn test_bound_bytes_are_little_endian() {
        let v = OrderedValue::from_value(&Value::Integer(1), &LogicalType::Long).unwrap();
        assert_eq!(v.to_bytes(), vec![1, 0, 0, 0, 0, 0, 0, 0]);

        let v = OrderedValue::from_value(&Value::Integer(258), &LogicalType::Integer).unwrap();
        assert_eq!(v.to_bytes(), vec![2, 1, 0, 0]);

        let v = OrderedValue::from_value(&Value::String("ice".into()), &LogicalType::String)
            .unwrap();
        assert_eq!(v.to_bytes(), b"ice".to_vec());
    }

    #[test]
    fn test_unordered_or_mismatched_values() {
        assert!(OrderedValue::from_value(&Value::Boolean(true), &LogicalType::Boolean).is_none());
        assert!(OrderedValue::from_value(&Value::Float(f64::NAN), &LogicalType::Double).is_none());
        assert!(OrderedValue::from_value(&Value::String("x".into()), &LogicalType::Long).is_none());
        assert!(
            OrderedValue::from_value(&Value::Integer(i64::MAX), &LogicalType::Integer).is_none()
        );
    }
}
