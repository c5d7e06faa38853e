//! Mapping between Tidewater column types and values and their `SQLite`
//! representations.
//!
//! `SQLite` keeps values by storage class, not by declared type. Temporal,
//! decimal and JSON values are stored as text; the declared type is kept so
//! that reading a table back yields the same [`ColumnType`].

use rusqlite::types::{Value as SqlValue, ValueRef};
use tidewater_types::{ColumnType, Value, STRING_MAX_LEN};

/// Declared `SQLite` type for a column type.
#[must_use]
pub fn sqlite_type(ty: ColumnType) -> String {
    match ty {
        ColumnType::Boolean => "BOOLEAN".into(),
        ColumnType::Integer => "INT".into(),
        ColumnType::BigInt => "BIGINT".into(),
        ColumnType::Decimal => "DECIMAL".into(),
        ColumnType::Float => "REAL".into(),
        ColumnType::Date => "DATE".into(),
        ColumnType::Datetime => "DATETIME".into(),
        ColumnType::TimestampTz => "TIMESTAMPTZ".into(),
        ColumnType::Json => "JSON".into(),
        ColumnType::String => format!("VARCHAR({STRING_MAX_LEN})"),
        ColumnType::Text => "TEXT".into(),
        ColumnType::Binary => "BLOB".into(),
    }
}

/// Column type for a declared `SQLite` type. `None` when nothing is declared.
///
/// Unknown declarations fall back to `SQLite`'s own affinity rules.
#[must_use]
pub fn column_type(decl: &str) -> Option<ColumnType> {
    let decl = decl.trim().to_ascii_uppercase();
    if decl.is_empty() {
        return None;
    }
    let base = decl.split('(').next().unwrap_or_default().trim();
    let ty = match base {
        "BOOLEAN" | "BOOL" => ColumnType::Boolean,
        "INT" | "INT2" | "INT4" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => ColumnType::Integer,
        "INTEGER" | "BIGINT" | "INT8" | "UNSIGNED BIG INT" => ColumnType::BigInt,
        "DECIMAL" | "NUMERIC" => ColumnType::Decimal,
        "REAL" | "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" => ColumnType::Float,
        "DATE" => ColumnType::Date,
        "DATETIME" | "TIMESTAMP" => ColumnType::Datetime,
        "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => ColumnType::TimestampTz,
        "JSON" | "JSONB" => ColumnType::Json,
        "VARCHAR" | "CHAR" | "NCHAR" | "NVARCHAR" | "CHARACTER" | "VARYING CHARACTER" | "CHARACTER VARYING" => {
            ColumnType::String
        }
        "TEXT" | "CLOB" => ColumnType::Text,
        "BLOB" | "BINARY" | "VARBINARY" => ColumnType::Binary,
        other if other.contains("INT") => ColumnType::BigInt,
        other if other.contains("CHAR") || other.contains("CLOB") || other.contains("TEXT") => ColumnType::Text,
        other if other.contains("BLOB") => ColumnType::Binary,
        other if other.contains("REAL") || other.contains("FLOA") || other.contains("DOUB") => ColumnType::Float,
        _ => ColumnType::Decimal,
    };
    Some(ty)
}

/// Value to bind for `value`.
#[must_use]
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Binary(b) => SqlValue::Blob(b.clone()),
        Value::String(s) | Value::Decimal(s) => SqlValue::Text(s.clone()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
        other @ (Value::Date(_) | Value::Datetime(_) | Value::TimestampTz(_)) => SqlValue::Text(other.to_string()),
    }
}

/// Read a stored value, typed by the column's declared type when known.
#[must_use]
pub fn from_sql(raw: ValueRef<'_>, ty: Option<ColumnType>) -> Value {
    let value = match raw {
        ValueRef::Null => return Value::Null,
        ValueRef::Integer(i) if ty == Some(ColumnType::Boolean) => return Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Binary(bytes.to_vec()),
    };
    match ty {
        Some(ty) if !ty.is_character() => value.cast(ty).unwrap_or(value),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("INTEGER", ColumnType::BigInt)]
    #[case("int", ColumnType::Integer)]
    #[case("VARCHAR(40)", ColumnType::String)]
    #[case("decimal(10, 2)", ColumnType::Decimal)]
    #[case("TIMESTAMPTZ", ColumnType::TimestampTz)]
    #[case("unsigned integer", ColumnType::BigInt)]
    #[case("nvarchar2", ColumnType::Text)]
    #[case("money", ColumnType::Decimal)]
    fn maps_declared_types(#[case] decl: &str, #[case] expected: ColumnType) {
        assert_eq!(column_type(decl), Some(expected));
    }

    #[test]
    fn emitted_types_read_back_unchanged() {
        for ty in ColumnType::ALL {
            assert_eq!(column_type(&sqlite_type(ty)), Some(ty), "{ty}");
        }
        assert_eq!(column_type("  "), None);
    }

    #[test]
    fn reads_values_by_declared_type() {
        assert_eq!(from_sql(ValueRef::Integer(1), Some(ColumnType::Boolean)), Value::Bool(true));
        assert_eq!(from_sql(ValueRef::Integer(7), None), Value::Int(7));
        let date = from_sql(ValueRef::Text(b"2024-02-29"), Some(ColumnType::Date));
        assert!(matches!(date, Value::Date(_)));
        let text = from_sql(ValueRef::Text(b"2024-02-29"), Some(ColumnType::Text));
        assert_eq!(text, Value::String("2024-02-29".into()));
        let bad = from_sql(ValueRef::Text(b"not a date"), Some(ColumnType::Date));
        assert_eq!(bad, Value::String("not a date".into()));
    }

    #[test]
    fn binds_temporal_values_as_text() {
        let date = Value::String("2024-01-05".into()).cast(ColumnType::Date).unwrap();
        assert_eq!(to_sql(&date), SqlValue::Text("2024-01-05".into()));
        assert_eq!(to_sql(&Value::Bool(true)), SqlValue::Integer(1));
    }
}
