//! Type inference over sampled rows.
//!
//! Every candidate type is tried in a fixed precedence order and the first
//! one that accepts all non-null sampled values wins. `text` accepts
//! everything, so inference always terminates with a type.

use tidewater_types::{Column, ColumnType, Columns, Row, Value};

/// Rows sampled per stream before it is released to consumers.
pub const DEFAULT_SAMPLE_SIZE: usize = 900;

/// Minimum sample size before safe inference commits to a non-string type.
pub const DEFAULT_SAFE_MIN_ROWS: usize = 10;

const PRECEDENCE: [ColumnType; 12] = [
    ColumnType::Boolean,
    ColumnType::Integer,
    ColumnType::BigInt,
    ColumnType::Decimal,
    ColumnType::Float,
    ColumnType::Date,
    ColumnType::Datetime,
    ColumnType::TimestampTz,
    ColumnType::Json,
    ColumnType::Binary,
    ColumnType::String,
    ColumnType::Text,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceOptions {
    /// Fall back to character types when the sample is smaller than
    /// `safe_min_rows`.
    pub safe: bool,
    pub safe_min_rows: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            safe: true,
            safe_min_rows: DEFAULT_SAFE_MIN_ROWS,
        }
    }
}

/// Narrowest type accepting `value`, or `None` for null.
#[must_use]
pub fn classify(value: &Value) -> Option<ColumnType> {
    if value.is_null() {
        return None;
    }
    Some(
        PRECEDENCE
            .into_iter()
            .find(|ty| value.fits(*ty))
            .unwrap_or(ColumnType::Text),
    )
}

/// Narrowest type accepting every non-null value. All-null and empty
/// inputs resolve to `string`.
pub fn infer_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
    let values: Vec<&Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if values.is_empty() {
        return ColumnType::String;
    }
    PRECEDENCE
        .into_iter()
        .find(|ty| values.iter().all(|v| v.fits(*ty)))
        .unwrap_or(ColumnType::Text)
}

fn infer_character_type<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
    if values.into_iter().all(|v| v.fits(ColumnType::String)) {
        ColumnType::String
    } else {
        ColumnType::Text
    }
}

/// Infer a type for every column from `sample`, whose rows are laid out in
/// `columns` order. Short rows are treated as null-padded.
///
/// An empty sample leaves `columns` untouched. Names, positions, and
/// metadata are preserved; native type strings are cleared.
#[must_use]
pub fn infer_columns(columns: &Columns, sample: &[Row], options: InferenceOptions) -> Columns {
    if sample.is_empty() {
        return columns.clone();
    }
    let character_only = options.safe && sample.len() < options.safe_min_rows;
    let inferred: Vec<Column> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let values = sample.iter().filter_map(|row| row.get(i));
            let column_type = if character_only {
                infer_character_type(values)
            } else {
                infer_type(values)
            };
            Column {
                column_type,
                db_type: None,
                ..col.clone()
            }
        })
        .collect();
    Columns::new(inferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn text_rows(rows: &[&[&str]]) -> Vec<Row> {
        rows.iter()
            .map(|r| r.iter().map(|v| Value::from(*v)).collect())
            .collect()
    }

    #[rstest]
    #[case(&["true", "FALSE"], ColumnType::Boolean)]
    #[case(&["1", "-2", "30"], ColumnType::Integer)]
    #[case(&["1", "9000000000"], ColumnType::BigInt)]
    #[case(&["1", "2.50"], ColumnType::Decimal)]
    #[case(&["1.5", "2e10"], ColumnType::Float)]
    #[case(&["2024-01-01", "2024-02-29"], ColumnType::Date)]
    #[case(&["2024-01-01", "2024-01-01 10:00:00"], ColumnType::Datetime)]
    #[case(&["2024-01-01 10:00:00", "2024-01-01T10:00:00Z"], ColumnType::TimestampTz)]
    #[case(&[r#"{"a":1}"#, "[1,2]"], ColumnType::Json)]
    #[case(&["1", "true"], ColumnType::String)]
    #[case(&["1", "abc"], ColumnType::String)]
    fn picks_narrowest_accepting_type(#[case] values: &[&str], #[case] expected: ColumnType) {
        let values: Vec<Value> = values.iter().map(|v| Value::from(*v)).collect();
        assert_eq!(infer_type(&values), expected);
    }

    #[test]
    fn long_strings_become_text() {
        let long = Value::String("x".repeat(300));
        assert_eq!(infer_type([&Value::from("short"), &long]), ColumnType::Text);
    }

    #[test]
    fn nulls_are_ignored_and_all_null_is_string() {
        assert_eq!(infer_type([&Value::Null, &Value::from("7")]), ColumnType::Integer);
        assert_eq!(infer_type([&Value::Null, &Value::Null]), ColumnType::String);
    }

    #[test]
    fn typed_values_keep_their_type() {
        assert_eq!(classify(&Value::Int(1)), Some(ColumnType::Integer));
        assert_eq!(classify(&Value::Bool(true)), Some(ColumnType::Boolean));
        assert_eq!(classify(&Value::Binary(vec![1])), Some(ColumnType::Binary));
        assert_eq!(classify(&Value::Null), None);
    }

    #[test]
    fn infers_per_column_and_keeps_metadata() {
        let mut cols = Columns::from_names(["id", "name", "age"], ColumnType::String);
        cols.set_metadata(tidewater_types::KeyType::PrimaryKey, &["id".into()], "source")
            .unwrap();
        let sample = text_rows(&[&["1", "Alice", "30"], &["2", "Bob"], &["3", "Charlie", "35"]]);
        let inferred = infer_columns(
            &cols,
            &sample,
            InferenceOptions {
                safe: false,
                safe_min_rows: 0,
            },
        );
        let types: Vec<ColumnType> = inferred.iter().map(|c| c.column_type).collect();
        assert_eq!(types, vec![ColumnType::Integer, ColumnType::String, ColumnType::Integer]);
        assert!(inferred[0].is_key(tidewater_types::KeyType::PrimaryKey));
    }

    #[test]
    fn safe_mode_needs_minimum_sample() {
        let cols = Columns::from_names(["id"], ColumnType::String);
        let sample = text_rows(&[&["1"], &["2"]]);
        let safe = InferenceOptions {
            safe: true,
            safe_min_rows: 3,
        };
        assert_eq!(infer_columns(&cols, &sample, safe)[0].column_type, ColumnType::String);

        let sample = text_rows(&[&["1"], &["2"], &["3"]]);
        assert_eq!(infer_columns(&cols, &sample, safe)[0].column_type, ColumnType::Integer);
    }

    #[test]
    fn empty_sample_keeps_columns() {
        let cols = Columns::from_names(["id"], ColumnType::BigInt);
        assert_eq!(infer_columns(&cols, &[], InferenceOptions::default()), cols);
    }

    fn sample_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(|i| Value::String(i.to_string())),
            any::<bool>().prop_map(|b| Value::String(b.to_string())),
            (-1.0e6f64..1.0e6).prop_map(|f| Value::String(format!("{f:.3}"))),
            "[a-z]{0,12}".prop_map(Value::String),
            (2000i32..2030, 1u32..13, 1u32..29)
                .prop_map(|(y, m, d)| Value::String(format!("{y:04}-{m:02}-{d:02}"))),
        ]
    }

    proptest! {
        #[test]
        fn inference_is_idempotent(rows in proptest::collection::vec(proptest::collection::vec(sample_value(), 3), 0..40)) {
            let cols = Columns::from_names(["a", "b", "c"], ColumnType::String);
            let opts = InferenceOptions { safe: false, safe_min_rows: 0 };
            let first = infer_columns(&cols, &rows, opts);
            let second = infer_columns(&cols, &rows, opts);
            prop_assert_eq!(&first, &second);
            // Re-running over already inferred columns is stable too.
            prop_assert_eq!(infer_columns(&first, &rows, opts), first);
        }

        #[test]
        fn inferred_type_accepts_every_value(values in proptest::collection::vec(sample_value(), 1..40)) {
            let ty = infer_type(&values);
            for v in &values {
                prop_assert!(v.fits(ty), "{v:?} does not fit {ty}");
            }
        }
    }
}
