//! Load modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Policy governing how staged rows reconcile with the final table.
///
/// Serialized as the literal strings `full-refresh`, `truncate`,
/// `incremental`, `backfill`, and `snapshot`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadMode {
    /// Replace the final table with the staged rows.
    #[default]
    FullRefresh,
    /// Empty the final table, keeping its definition, then insert.
    Truncate,
    /// Append new rows, or upsert them when a primary key is declared.
    Incremental,
    /// Incremental over an explicit update-key range.
    Backfill,
    /// Full refresh stamped with a load timestamp column.
    Snapshot,
}

impl LoadMode {
    pub const ALL: [LoadMode; 5] = [
        Self::FullRefresh,
        Self::Truncate,
        Self::Incremental,
        Self::Backfill,
        Self::Snapshot,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullRefresh => "full-refresh",
            Self::Truncate => "truncate",
            Self::Incremental => "incremental",
            Self::Backfill => "backfill",
            Self::Snapshot => "snapshot",
        }
    }

    /// Whether this mode reconciles against existing final-table rows.
    #[must_use]
    pub fn is_incremental(self) -> bool {
        matches!(self, Self::Incremental | Self::Backfill)
    }

    /// Whether this mode discards the final table before inserting.
    #[must_use]
    pub fn replaces_table(self) -> bool {
        matches!(self, Self::FullRefresh | Self::Snapshot)
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                FlowError::Config(format!(
                    "invalid load mode '{s}', expected one of: full-refresh, truncate, incremental, backfill, snapshot"
                ))
            })
    }
}
