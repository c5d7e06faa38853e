//! Typed row values.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::column::{ColumnType, STRING_MAX_LEN};
use crate::parse;

/// One ordered row. Its width equals the owning stream's column count at
/// the moment it was produced.
pub type Row = Vec<Value>;

/// A single typed value. Any value may be null regardless of column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Canonical decimal text, see [`parse::parse_decimal`].
    Decimal(String),
    Float(f64),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(serde_json::Value),
    String(String),
    Binary(Vec<u8>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value can be stored in a column of type `ty` as is or
    /// after a lossless cast.
    ///
    /// Stricter than [`Value::cast`] for `json` (only objects and arrays),
    /// `string` (bounded length), and `integer` (32-bit range).
    #[must_use]
    pub fn fits(&self, ty: ColumnType) -> bool {
        match (self, ty) {
            (Self::Null, _) => true,
            (Self::Json(_), ColumnType::Json) => true,
            (Self::String(s), ColumnType::Json) => parse::parse_json(s).is_some(),
            (_, ColumnType::Json) => false,
            (Self::String(s), ColumnType::String) => s.chars().count() <= STRING_MAX_LEN,
            (_, ColumnType::String) => self.to_string().chars().count() <= STRING_MAX_LEN,
            (Self::Binary(_), ColumnType::Binary) => true,
            (_, ColumnType::Binary) => false,
            (_, ColumnType::Integer) => {
                matches!(self.cast(ty), Some(Self::Int(i)) if i32::try_from(i).is_ok())
            }
            _ => self.cast(ty).is_some(),
        }
    }

    /// Convert this value to the representation of column type `ty`.
    ///
    /// Returns `None` when the value cannot be represented without loss.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn cast(&self, ty: ColumnType) -> Option<Value> {
        if self.is_null() {
            return Some(Self::Null);
        }
        match ty {
            ColumnType::String | ColumnType::Text => Some(match self {
                Self::String(_) => self.clone(),
                other => Self::String(other.to_string()),
            }),
            ColumnType::Boolean => match self {
                Self::Bool(b) => Some(Self::Bool(*b)),
                Self::String(s) => parse::parse_bool(s).map(Self::Bool),
                _ => None,
            },
            ColumnType::Integer | ColumnType::BigInt => match self {
                Self::Int(i) => Some(Self::Int(*i)),
                Self::Decimal(s) | Self::String(s) => parse::parse_int(s).map(Self::Int),
                Self::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(Self::Int(*f as i64)),
                _ => None,
            },
            ColumnType::Decimal => match self {
                Self::Decimal(_) => Some(self.clone()),
                Self::Int(i) => Some(Self::Decimal(i.to_string())),
                Self::Float(f) => parse::parse_decimal(&f.to_string()).map(Self::Decimal),
                Self::String(s) => parse::parse_decimal(s).map(Self::Decimal),
                _ => None,
            },
            ColumnType::Float => match self {
                Self::Float(f) => Some(Self::Float(*f)),
                Self::Int(i) => Some(Self::Float(*i as f64)),
                Self::Decimal(s) | Self::String(s) => parse::parse_float(s).map(Self::Float),
                _ => None,
            },
            ColumnType::Date => match self {
                Self::Date(d) => Some(Self::Date(*d)),
                Self::String(s) => parse::parse_date(s).map(Self::Date),
                _ => None,
            },
            ColumnType::Datetime => match self {
                Self::Datetime(dt) => Some(Self::Datetime(*dt)),
                Self::Date(d) => Some(Self::Datetime(d.and_time(NaiveTime::MIN))),
                Self::String(s) => parse::parse_datetime(s).map(Self::Datetime),
                _ => None,
            },
            ColumnType::TimestampTz => match self {
                Self::TimestampTz(ts) => Some(Self::TimestampTz(*ts)),
                Self::Datetime(dt) => Some(Self::TimestampTz(dt.and_utc().fixed_offset())),
                Self::Date(d) => Some(Self::TimestampTz(d.and_time(NaiveTime::MIN).and_utc().fixed_offset())),
                Self::String(s) => parse::parse_timestamptz(s)
                    .or_else(|| parse::parse_datetime(s).map(|dt| dt.and_utc().fixed_offset()))
                    .map(Self::TimestampTz),
                _ => None,
            },
            ColumnType::Json => match self {
                Self::Json(v) => Some(Self::Json(v.clone())),
                Self::String(s) => Some(Self::Json(
                    parse::parse_json(s).unwrap_or_else(|| serde_json::Value::String(s.clone())),
                )),
                other => Some(Self::Json(other.to_json())),
            },
            ColumnType::Binary => match self {
                Self::Binary(b) => Some(Self::Binary(b.clone())),
                Self::String(s) => Some(Self::Binary(s.as_bytes().to_vec())),
                _ => None,
            },
        }
    }

    /// Contribution of this value to a per-column content checksum.
    ///
    /// `None` for types without a stable checksum (decimal, float).
    #[must_use]
    pub fn checksum(&self) -> Option<u64> {
        match self {
            Self::Null => Some(0),
            Self::Bool(b) => Some(u64::from(*b)),
            Self::Int(i) => Some(i.unsigned_abs()),
            Self::String(s) => Some(s.chars().count() as u64),
            Self::Json(v) => Some(v.to_string().chars().count() as u64),
            Self::Binary(b) => Some(b.len() as u64),
            Self::Date(d) => Some(d.and_time(NaiveTime::MIN).and_utc().timestamp().unsigned_abs()),
            Self::Datetime(dt) => Some(dt.and_utc().timestamp().unsigned_abs()),
            Self::TimestampTz(ts) => Some(ts.timestamp().unsigned_abs()),
            Self::Decimal(_) | Self::Float(_) => None,
        }
    }

    /// JSON representation used by line-delimited JSON output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::Int(i) => J::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Self::Json(v) => v.clone(),
            other => J::String(other.to_string()),
        }
    }

    /// Map a parsed JSON value onto the closest typed value.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match value {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(b),
            J::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Decimal(n.to_string())),
            J::String(s) => Self::String(s),
            other @ (J::Array(_) | J::Object(_)) => Self::Json(other),
        }
    }

    /// Current UTC time as a timestamp-with-timezone value.
    #[must_use]
    pub fn now() -> Self {
        Self::TimestampTz(Utc::now().fixed_offset())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Decimal(s) | Self::String(s) => f.write_str(s),
            Self::Float(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Datetime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Self::TimestampTz(ts) => f.write_str(&ts.to_rfc3339()),
            Self::Json(v) => write!(f, "{v}"),
            Self::Binary(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
