//! Load and task result types with timing breakdowns.

use serde::Serialize;

use tidewater_types::LoadMode;

use crate::verify::ChecksumOutcome;

/// Load orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Staging,
    Verifying,
    Merging,
    Committed,
    Aborted,
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Staging => "staging",
            Self::Verifying => "verifying",
            Self::Merging => "merging",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        })
    }
}

/// How staged rows reach the final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Swap,
    Replace,
    TruncateInsert,
    Insert,
    Upsert,
    DeleteInsert,
}

/// Wall-clock seconds spent per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadTimings {
    pub staging_secs: f64,
    pub verify_secs: f64,
    pub merge_secs: f64,
    pub total_secs: f64,
}

/// Outcome of one orchestrated load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadResult {
    pub phase: LoadPhase,
    pub table: String,
    pub staging_table: String,
    pub mode: LoadMode,
    pub strategy: Option<MergeStrategy>,
    pub rows_staged: u64,
    pub rows_merged: u64,
    pub checksum: Option<ChecksumOutcome>,
    pub merge_skipped: bool,
    pub timings: LoadTimings,
}

/// Outcome of a task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task: String,
    pub mode: LoadMode,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Set for database targets.
    pub load: Option<LoadResult>,
    /// Set for file targets.
    pub bytes_written: Option<u64>,
    pub duration_secs: f64,
}
