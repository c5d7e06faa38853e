use std::path::Path;

use anyhow::{Context, Result};

use tidewater_engine::{run_task, TaskResult};
use tidewater_state::{RunStats, RunStatus, RunStore, SqliteRunStore};

use super::{load_task, source_handle, target_conn, target_handle};

/// Execute the `run` command: parse, validate, and run a task, recording it
/// in the run-history database at `state_db`.
pub async fn execute(task_path: &Path, state_db: &Path) -> Result<()> {
    let task = load_task(task_path)?;
    tracing::info!(
        task = %task.name,
        mode = %task.mode,
        source = %task.source.conn,
        target = %target_conn(&task),
        "Task validated"
    );

    let source = source_handle(&task.source.conn);
    let target = target_handle(target_conn(&task))?;

    let store = SqliteRunStore::open(state_db)
        .with_context(|| format!("Failed to open run history: {}", state_db.display()))?;
    let run_id = store.start_run(&task.name)?;

    let outcome = run_task(&task, source, target).await;
    let (status, stats) = match &outcome {
        Ok(result) => (
            RunStatus::Completed,
            RunStats {
                rows_read: result.rows_read,
                rows_written: result.rows_written,
                error_message: None,
            },
        ),
        Err(e) => (
            RunStatus::Failed,
            RunStats {
                error_message: Some(format!("{e:#}")),
                ..RunStats::default()
            },
        ),
    };
    if let Err(e) = store.complete_run(run_id, status, &stats) {
        tracing::warn!(run_id, error = %e, "Could not record run outcome");
    }

    let result = outcome?;
    print_summary(&result);
    println!("@@TASK_JSON@@{}", serde_json::to_string(&result)?);
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn print_summary(result: &TaskResult) {
    println!("Task '{}' completed successfully.", result.task);
    println!("  Mode:            {}", result.mode);
    println!("  Rows read:       {}", result.rows_read);
    println!("  Rows written:    {}", result.rows_written);
    if let Some(load) = &result.load {
        println!("  Table:           {}", load.table);
        if let Some(strategy) = load.strategy {
            println!("  Merge strategy:  {strategy:?}");
        }
        if load.merge_skipped {
            println!("  Merge skipped:   no rows staged");
        }
        println!("  Staging:         {:.3}s", load.timings.staging_secs);
        println!("  Verify:          {:.3}s", load.timings.verify_secs);
        println!("  Merge:           {:.3}s", load.timings.merge_secs);
    }
    if let Some(bytes) = result.bytes_written {
        println!("  Bytes written:   {}", format_bytes(bytes));
    }
    println!("  Duration:        {:.2}s", result.duration_secs);
    if result.duration_secs > 0.0 {
        println!(
            "  Throughput:      {:.0} rows/sec",
            result.rows_read as f64 / result.duration_secs
        );
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
