//! Run store trait and record types.

use std::fmt;
use std::str::FromStr;

use crate::error::{self, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Aggregate counts recorded when a run finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub rows_read: u64,
    pub rows_written: u64,
    pub error_message: Option<String>,
}

/// One stored run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub task: String,
    pub status: RunStatus,
    /// ISO-8601, UTC.
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats: RunStats,
}

/// Storage contract for run history.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn RunStore>`.
pub trait RunStore: Send + Sync {
    /// Record the start of a run and return its ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn start_run(&self, task: &str) -> error::Result<i64>;

    /// Finalize a run with its status and stats.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()>;

    /// The `limit` most recent runs of `task`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn last_runs(&self, task: &str, limit: usize) -> error::Result<Vec<RunRecord>>;
}
