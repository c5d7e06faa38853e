//! Post-staging consistency checks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use tidewater_types::{Columns, FlowError};

use crate::connector::{blocking, TableName, TargetConnection};

/// Staged row count must equal the count observed while streaming.
///
/// # Errors
///
/// Returns [`FlowError::Consistency`] on any difference.
pub fn verify_count(staged: u64, observed: u64) -> Result<(), FlowError> {
    if staged == observed {
        Ok(())
    } else {
        Err(FlowError::Consistency(format!(
            "inserted in staging table count ({staged}) != stream count ({observed})"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ChecksumOutcome {
    Skipped(String),
    Matched,
    Mismatched(Vec<String>),
}

/// Compare the target's per-column checksums of `table` with the
/// accumulators filled while encoding. Columns where either side has no
/// checksum are skipped.
///
/// # Errors
///
/// Returns [`FlowError::Consistency`] on a mismatch when `strict`, or the
/// target's error if checksums cannot be computed.
pub async fn verify_checksum(
    target: &Arc<dyn TargetConnection>,
    table: &TableName,
    columns: &Columns,
    expected: &BTreeMap<String, Option<u64>>,
    strict: bool,
) -> Result<ChecksumOutcome, FlowError> {
    let owned_table = table.clone();
    let owned_columns = columns.clone();
    let actual = blocking(target, move |t| t.column_checksums(&owned_table, &owned_columns)).await?;

    let mut compared = 0usize;
    let mut mismatched = Vec::new();
    for (col, actual) in columns.iter().zip(actual) {
        let expected = expected.get(&col.name.to_lowercase()).copied().flatten();
        let (Some(expected), Some(actual)) = (expected, actual) else {
            continue;
        };
        compared += 1;
        if expected != actual {
            mismatched.push(format!("{} (stream {expected} != table {actual})", col.name));
        }
    }

    if compared == 0 {
        return Ok(ChecksumOutcome::Skipped("no comparable columns".into()));
    }
    if mismatched.is_empty() {
        tracing::debug!(table = %table, columns = compared, "Checksums matched");
        return Ok(ChecksumOutcome::Matched);
    }
    let message = format!("checksum mismatch on {table}: {}", mismatched.join(", "));
    if strict {
        return Err(FlowError::Consistency(message));
    }
    tracing::warn!(table = %table, "{message}");
    Ok(ChecksumOutcome::Mismatched(mismatched))
}
