pub mod check;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use tidewater_engine::config::{parse_task, validate_task, ConnKind, ConnUrl, PreparedTarget, PreparedTask};
use tidewater_engine::{SourceHandle, TargetHandle};
use tidewater_file::LocalFileSystem;
use tidewater_sqlite::{SqliteSource, SqliteTarget};

/// Parse, validate and resolve the task at `path`.
fn load_task(path: &Path) -> Result<PreparedTask> {
    let config = parse_task(path).with_context(|| format!("Failed to parse task: {}", path.display()))?;
    validate_task(&config)?;
    config.prepare()
}

fn target_conn(task: &PreparedTask) -> &ConnUrl {
    match &task.target {
        PreparedTarget::Database { conn, .. } | PreparedTarget::File { conn } => conn,
    }
}

fn source_handle(conn: &ConnUrl) -> SourceHandle {
    match conn.kind {
        ConnKind::Sqlite => SourceHandle::Database(Arc::new(SqliteSource::new(conn.path.clone()))),
        ConnKind::File => SourceHandle::File(Arc::new(LocalFileSystem)),
    }
}

fn target_handle(conn: &ConnUrl) -> Result<TargetHandle> {
    Ok(match conn.kind {
        ConnKind::Sqlite => {
            let target = SqliteTarget::open(&conn.path).with_context(|| format!("Failed to open {conn}"))?;
            TargetHandle::Database(Arc::new(target))
        }
        ConnKind::File => TargetHandle::File(Arc::new(LocalFileSystem)),
    })
}
