//! Column and type model shared by every row sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Longest value (in characters) a `string` column holds before it widens to `text`.
pub const STRING_MAX_LEN: usize = 255;

/// Semantic column type. A closed set ordered by the widening lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Decimal,
    Float,
    Date,
    Datetime,
    TimestampTz,
    Json,
    String,
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Boolean,
    Numeric,
    Temporal,
    Character,
    Json,
    Binary,
}

impl ColumnType {
    pub const ALL: [ColumnType; 12] = [
        Self::Boolean,
        Self::Integer,
        Self::BigInt,
        Self::Decimal,
        Self::Float,
        Self::Date,
        Self::Datetime,
        Self::TimestampTz,
        Self::Json,
        Self::String,
        Self::Text,
        Self::Binary,
    ];

    fn family(self) -> (Family, u8) {
        match self {
            Self::Boolean => (Family::Boolean, 0),
            Self::Integer => (Family::Numeric, 0),
            Self::BigInt => (Family::Numeric, 1),
            Self::Decimal => (Family::Numeric, 2),
            Self::Float => (Family::Numeric, 3),
            Self::Date => (Family::Temporal, 0),
            Self::Datetime => (Family::Temporal, 1),
            Self::TimestampTz => (Family::Temporal, 2),
            Self::String => (Family::Character, 0),
            Self::Text => (Family::Character, 1),
            Self::Json => (Family::Json, 0),
            Self::Binary => (Family::Binary, 0),
        }
    }

    /// Least type able to hold values of both `self` and `other`.
    ///
    /// Types in the same chain resolve to the wider one; `text` absorbs
    /// everything; any other pair falls back to `string`.
    #[must_use]
    pub fn widen(self, other: Self) -> Self {
        if self == other {
            return self;
        }
        if self == Self::Text || other == Self::Text {
            return Self::Text;
        }
        let (fa, ra) = self.family();
        let (fb, rb) = other.family();
        if fa == fb {
            if ra >= rb {
                self
            } else {
                other
            }
        } else {
            Self::String
        }
    }

    /// Whether widening `self` by `other` produces a different type.
    #[must_use]
    pub fn widens_to(self, other: Self) -> bool {
        self.widen(other) != self
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        self.family().0 == Family::Numeric
    }

    #[must_use]
    pub fn is_temporal(self) -> bool {
        self.family().0 == Family::Temporal
    }

    #[must_use]
    pub fn is_character(self) -> bool {
        self.family().0 == Family::Character
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::BigInt => "bigint",
            Self::Decimal => "decimal",
            Self::Float => "float",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::TimestampTz => "timestamptz",
            Self::Json => "json",
            Self::String => "string",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FlowError::Config(format!("unknown column type '{s}'")))
    }
}

/// Column metadata keys understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    PrimaryKey,
    UpdateKey,
    ClusterKey,
}

impl KeyType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryKey => "primary-key",
            Self::UpdateKey => "update-key",
            Self::ClusterKey => "cluster-key",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How column names are cased when written to a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCasing {
    /// Keep names exactly as the source produced them.
    #[default]
    Source,
    /// Fold to the target store's native identifier case.
    Target,
    /// Convert to `snake_case`, then fold to the target's case.
    Snake,
}

impl ColumnCasing {
    /// Apply this casing rule to `name` for a store that folds identifiers
    /// to upper case when `upper` is set.
    #[must_use]
    pub fn apply(self, name: &str, upper: bool) -> String {
        let fold = |s: String| if upper { s.to_uppercase() } else { s.to_lowercase() };
        match self {
            Self::Source => name.to_string(),
            Self::Target => fold(name.to_string()),
            Self::Snake => fold(snake_case(name)),
        }
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            out.extend(c.to_lowercase());
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// One column of a stream, a dataflow, or a target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// 1-based ordinal; 0 until the column is placed in a [`Columns`] set.
    #[serde(default)]
    pub position: usize,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Native type string of the target store, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Metadata key (see [`KeyType`]) to provenance tag.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            position: 0,
            column_type,
            db_type: None,
            constraint: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Case-insensitive name comparison.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }

    /// Widen this column's type by `other`. Returns `true` if the type changed.
    pub fn widen(&mut self, other: ColumnType) -> bool {
        let widened = self.column_type.widen(other);
        if widened == self.column_type {
            return false;
        }
        self.column_type = widened;
        self.db_type = None;
        true
    }

    #[must_use]
    pub fn is_key(&self, key: KeyType) -> bool {
        self.metadata.contains_key(key.as_str())
    }
}

/// What a [`Columns::merge`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: Vec<Column>,
    pub widened: Vec<Column>,
}

impl MergeOutcome {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.widened.is_empty()
    }
}

/// An ordered column set with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Columns(Vec<Column>);

impl Columns {
    /// Build a set, assigning positions `1..=n` in order.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        let mut set = Self(Vec::with_capacity(columns.len()));
        for col in columns {
            set.push(col);
        }
        set
    }

    /// Build a set of same-typed columns from names.
    pub fn from_names<I, S>(names: I, column_type: ColumnType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|n| Column::new(n, column_type))
                .collect(),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Column> {
        self.0.iter()
    }

    /// Mutable access to every column. Positions must not be changed.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Column> {
        self.0.iter_mut()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Column] {
        &self.0
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|c| c.name.clone()).collect()
    }

    /// First column whose name matches case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.0.iter().find(|c| c.matches(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.0.iter_mut().find(|c| c.matches(name))
    }

    /// Zero-based index of the first case-insensitive match.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|c| c.matches(name))
    }

    /// Append a column at the next position and return that position.
    pub fn push(&mut self, mut column: Column) -> usize {
        column.position = self.0.len() + 1;
        let position = column.position;
        self.0.push(column);
        position
    }

    /// Tag `names` with `key` and provenance `tag`.
    ///
    /// Re-setting the same key, columns, and tag is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Config`] if any name is not in the set.
    pub fn set_metadata(&mut self, key: KeyType, names: &[String], tag: &str) -> Result<(), FlowError> {
        let missing: Vec<&str> = names
            .iter()
            .filter(|n| self.get(n).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(FlowError::Config(format!(
                "{key} column(s) not found: {}",
                missing.join(", ")
            )));
        }
        for name in names {
            if let Some(col) = self.get_mut(name) {
                col.metadata.insert(key.as_str().to_string(), tag.to_string());
            }
        }
        Ok(())
    }

    /// Columns tagged with `key`, in column order.
    #[must_use]
    pub fn keys(&self, key: KeyType) -> Vec<&Column> {
        self.0.iter().filter(|c| c.is_key(key)).collect()
    }

    /// Unify `other` into this set by name.
    ///
    /// Existing columns keep their positions and widen on collision; unseen
    /// columns are appended in `other`'s order.
    pub fn merge(&mut self, other: &Columns) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for col in other.iter() {
            match self.get_mut(&col.name) {
                Some(existing) => {
                    if existing.widen(col.column_type) {
                        outcome.widened.push(existing.clone());
                    }
                    for (k, v) in &col.metadata {
                        existing.metadata.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
                None => {
                    let position = self.push(col.clone());
                    outcome.added.push(Column {
                        position,
                        ..col.clone()
                    });
                }
            }
        }
        outcome
    }

    /// Rename every column according to `casing`.
    #[must_use]
    pub fn with_casing(&self, casing: ColumnCasing, upper: bool) -> Self {
        Self(
            self.0
                .iter()
                .map(|c| Column {
                    name: casing.apply(&c.name, upper),
                    ..c.clone()
                })
                .collect(),
        )
    }
}

impl Index<usize> for Columns {
    type Output = Column;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a Column;
    type IntoIter = std::slice::Iter<'a, Column>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Column> for Columns {
    fn from_iter<T: IntoIterator<Item = Column>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
