//! Schema evolution policies applied when a stream's columns change mid-load.

use serde::{Deserialize, Serialize};

/// What to do when a stream produces a column the target table lacks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPolicy {
    /// Add the column to the target table.
    #[default]
    Add,
    /// Keep the column in the dataflow but never write it.
    Ignore,
    /// Abort the load.
    Fail,
}

/// What to do when a column's type widens mid-load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeChangePolicy {
    /// Alter the target column to the widened type.
    #[default]
    Widen,
    /// Widen only inside the dataflow; leave the target column alone.
    Ignore,
    /// Abort the load.
    Fail,
}

/// Schema evolution policy for one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaPolicy {
    pub new_column: ColumnPolicy,
    pub type_change: TypeChangePolicy,
}

impl SchemaPolicy {
    /// Whether missing columns may be added to an existing final table.
    #[must_use]
    pub fn adds_columns(self) -> bool {
        self.new_column == ColumnPolicy::Add
    }

    /// Whether column types of an existing final table may be widened.
    #[must_use]
    pub fn widens_types(self) -> bool {
        self.type_change == TypeChangePolicy::Widen
    }
}
