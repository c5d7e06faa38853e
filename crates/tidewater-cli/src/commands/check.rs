use std::path::Path;

use anyhow::{Context, Result};

use tidewater_engine::config::ConnKind;

use super::{load_task, target_conn, target_handle};

/// Execute the `check` command: validate the task and open both connections.
pub fn execute(task_path: &Path) -> Result<()> {
    let task = load_task(task_path)?;
    println!("Task structure:    OK");

    let source = &task.source.conn;
    std::fs::metadata(&source.path).with_context(|| format!("Source not found: {source}"))?;
    println!("Source:            OK ({source})");

    let target = target_conn(&task);
    if target.kind == ConnKind::Sqlite {
        target_handle(target)?;
    }
    println!("Target:            OK ({target})");

    println!("\nAll checks passed.");
    Ok(())
}
